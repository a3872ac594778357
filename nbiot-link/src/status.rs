//! Module status tracking from unsolicited reports.
//!
//! The default report table, in match order:
//!
//! | Prefix           | Effect                                   |
//! |------------------|------------------------------------------|
//! | `*MATREADY`      | module booted                            |
//! | `+CFUN`          | radio on / off                           |
//! | `+CPIN`          | SIM ready when the line holds `READY`    |
//! | `+IP`            | IPv4 (`.`) or IPv6 (`:`) address         |
//! | `+M2MCLIRECV`    | inbound frame, handed to the bridge      |
//! | `+M2MCLI`        | LwM2M register / observe / notify events |
//! | everything else  | logged                                   |
//!
//! `+M2MCLIRECV` precedes `+M2MCLI` since the table is first-match.

use crate::bridge::Bridge;
use nbiot_at::{AtSession, Clock, ReportTable, SerialTransport};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Report prefixes the module emits, in match order.
pub const ACTIVE_REPORTS: &[&str] = &[
    "*MATREADY",
    "+CFUN",
    "+CPIN",
    "+IP",
    "+ESONMI",
    "+ESODATA",
    "+EMQDISCON",
    "+EMQPUB",
    "+ECOAPNMI",
    "+M2MCLIRECV",
    "+M2MCLI",
    "+iperf",
    "+ZGPSR",
    "+MIPLEVENT",
    "+MIPLREAD",
    "+MIPLWRITE",
    "+MIPLOBSERVE",
    "+MIPLDISCOVER",
    "+MIPLPARAMETER",
];

/// Module state observed through unsolicited reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub ready: bool,
    pub radio_on: bool,
    pub sim_ready: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub registered: bool,
    pub observed: bool,
    pub notified: bool,
}

impl ModuleStatus {
    /// Returns whether the module holds an address of either family.
    pub fn has_address(&self) -> bool {
        self.ipv4 || self.ipv6
    }

    /// Applies one report line. Returns whether any flag changed.
    pub fn apply(&mut self, line: &str) -> bool {
        let before = *self;
        if line.starts_with("*MATREADY") {
            self.ready = true;
        } else if let Some(rest) = line.strip_prefix("+CFUN") {
            self.radio_on = report_value(rest).starts_with('1');
        } else if let Some(rest) = line.strip_prefix("+CPIN") {
            self.sim_ready = report_value(rest).contains("READY");
        } else if let Some(rest) = line.strip_prefix("+IP") {
            let addr = report_value(rest);
            if addr.contains('.') {
                self.ipv4 = true;
            } else if addr.contains(':') {
                self.ipv6 = true;
            }
        } else if let Some(rest) = line.strip_prefix("+M2MCLI") {
            let event = report_value(rest);
            if event.contains("deregister success") {
                self.registered = false;
                self.observed = false;
                self.notified = false;
            } else if event.contains("register success") {
                self.registered = true;
            } else if event.contains("observe success") {
                self.observed = true;
            } else if event.contains("notify success") {
                self.notified = true;
            }
        }
        *self != before
    }
}

fn report_value(rest: &str) -> &str {
    rest.trim_start().trim_start_matches(':').trim()
}

/// Shared module status, updated by the report table.
pub type SharedStatus = Arc<Mutex<ModuleStatus>>;

/// Fills `table` with the default routes.
///
/// `+M2MCLIRECV` goes to `bridge` when one is given.
pub fn install_status_reports(table: &mut ReportTable, bridge: Option<&Bridge>) -> SharedStatus {
    let status = SharedStatus::default();
    for &prefix in ACTIVE_REPORTS {
        match (prefix, bridge) {
            ("+M2MCLIRECV", Some(bridge)) => {
                table.register(prefix, bridge.report_handler());
            }
            ("*MATREADY" | "+CFUN" | "+CPIN" | "+IP" | "+M2MCLI", _) => {
                let status = status.clone();
                table.register(prefix, move |line| {
                    let mut status = status.lock();
                    if status.apply(line) {
                        info!(line, status = ?*status, "module status changed");
                    }
                });
            }
            _ => {
                table.register(prefix, move |line| debug!(prefix, line, "module report"));
            }
        }
    }
    status
}

/// Installs the default routes on a session.
pub fn install_default_reports<T: SerialTransport, C: Clock>(
    session: &mut AtSession<T, C>,
    bridge: Option<&Bridge>,
) -> SharedStatus {
    install_status_reports(session.reports_mut(), bridge)
}

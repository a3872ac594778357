//! Unsolicited report routing.
//!
//! Lines that arrive while no command is outstanding are matched against
//! an ordered list of literal prefixes. The first matching entry wins, so
//! a prefix that is itself a prefix of another (`+M2MCLI` and
//! `+M2MCLIRECV`) must be registered after the longer one.

use std::fmt;
use tracing::debug;

/// Handler invoked with the full report line.
pub type ReportHandler = Box<dyn FnMut(&str)>;

struct ReportEntry {
    prefix: String,
    handler: ReportHandler,
}

/// Ordered `(prefix, handler)` table with a fallback for unmatched lines.
#[derive(Default)]
pub struct ReportTable {
    entries: Vec<ReportEntry>,
    fallback: Option<ReportHandler>,
}

impl ReportTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler after all existing entries.
    pub fn register(&mut self, prefix: impl Into<String>, handler: impl FnMut(&str) + 'static) -> &mut Self {
        self.entries.push(ReportEntry {
            prefix: prefix.into(),
            handler: Box::new(handler),
        });
        self
    }

    /// Sets the handler for lines no prefix matches.
    pub fn set_fallback(&mut self, handler: impl FnMut(&str) + 'static) -> &mut Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Registered prefixes in match order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.prefix.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Routes `line` to the first entry whose prefix it starts with.
    ///
    /// Returns the matched prefix, or `None` if the fallback handled it.
    pub fn dispatch(&mut self, line: &str) -> Option<&str> {
        match self.entries.iter_mut().find(|e| line.starts_with(e.prefix.as_str())) {
            Some(entry) => {
                (entry.handler)(line);
                Some(entry.prefix.as_str())
            }
            None => {
                match &mut self.fallback {
                    Some(handler) => handler(line),
                    None => debug!(line, "unknown unsolicited report"),
                }
                None
            }
        }
    }
}

impl fmt::Debug for ReportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportTable")
            .field("prefixes", &self.prefixes().collect::<Vec<_>>())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl FnMut(&str) + 'static) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |line: &str| sink.borrow_mut().push(line.to_string()))
    }

    #[test]
    fn test_first_match_wins() {
        let (recv, on_recv) = recorder();
        let (cli, on_cli) = recorder();

        let mut table = ReportTable::new();
        table.register("+M2MCLIRECV", on_recv).register("+M2MCLI", on_cli);

        assert_eq!(table.dispatch("+M2MCLIRECV:0102"), Some("+M2MCLIRECV"));
        assert_eq!(table.dispatch("+M2MCLI:register success"), Some("+M2MCLI"));

        assert_eq!(*recv.borrow(), vec!["+M2MCLIRECV:0102"]);
        assert_eq!(*cli.borrow(), vec!["+M2MCLI:register success"]);
    }

    #[test]
    fn test_order_is_respected() {
        let (recv, on_recv) = recorder();
        let (cli, on_cli) = recorder();

        // Shorter prefix first shadows the longer one.
        let mut table = ReportTable::new();
        table.register("+M2MCLI", on_cli).register("+M2MCLIRECV", on_recv);

        assert_eq!(table.dispatch("+M2MCLIRECV:0102"), Some("+M2MCLI"));
        assert!(recv.borrow().is_empty());
        assert_eq!(cli.borrow().len(), 1);
    }

    #[test]
    fn test_fallback() {
        let (unknown, on_unknown) = recorder();
        let mut table = ReportTable::new();
        table.register("+CPIN", |_| {}).set_fallback(on_unknown);

        assert_eq!(table.dispatch("+NEWTHING: 1"), None);
        assert_eq!(*unknown.borrow(), vec!["+NEWTHING: 1"]);

        // No fallback installed: only logged.
        let mut bare = ReportTable::new();
        assert_eq!(bare.dispatch("+NEWTHING: 1"), None);
    }

    #[test]
    fn test_prefixes_in_order() {
        let mut table = ReportTable::new();
        table.register("*MATREADY", |_| {}).register("+CFUN", |_| {});
        assert_eq!(table.prefixes().collect::<Vec<_>>(), vec!["*MATREADY", "+CFUN"]);
        assert_eq!(table.len(), 2);
    }
}

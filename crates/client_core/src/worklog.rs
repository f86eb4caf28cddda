use shared::domain::WorklogEntry;

/// How one full-list replacement relates to what was already buffered.
/// The wire contract is always a wholesale replace; the tail-follow
/// display behavior is derived here, by diffing, not assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorklogDelta {
    /// Identical to the current buffer. Callers skip the scroll.
    Unchanged,
    /// The previous list is a strict prefix of the new one; `added`
    /// entries were appended at the tail.
    Extended { added: usize },
    /// Anything else. The display redraws from scratch.
    Replaced,
}

impl WorklogDelta {
    pub fn changed(self) -> bool {
        !matches!(self, WorklogDelta::Unchanged)
    }
}

/// Holds the most recently received activity log. Every refresh (poll
/// response or `work` push event) replaces the whole buffer; nothing
/// from a prior list survives, and server order is preserved as-is.
#[derive(Debug, Default)]
pub struct WorklogBuffer {
    entries: Vec<WorklogEntry>,
}

impl WorklogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a freshly fetched list and reports exactly one delta
    /// for it.
    pub fn replace(&mut self, entries: Vec<WorklogEntry>) -> WorklogDelta {
        let delta = if entries == self.entries {
            WorklogDelta::Unchanged
        } else if entries.len() > self.entries.len()
            && entries[..self.entries.len()] == self.entries[..]
        {
            WorklogDelta::Extended {
                added: entries.len() - self.entries.len(),
            }
        } else {
            WorklogDelta::Replaced
        };
        self.entries = entries;
        delta
    }

    pub fn entries(&self) -> &[WorklogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(line: &str, code: Option<i32>) -> WorklogEntry {
        WorklogEntry {
            command: line.split(' ').map(str::to_string).collect(),
            output: String::new(),
            code,
        }
    }

    #[test]
    fn replacement_discards_the_previous_list_wholesale() {
        let mut buffer = WorklogBuffer::new();
        buffer.replace(vec![entry("git pull", Some(0)), entry("make bake", Some(0))]);

        let delta = buffer.replace(vec![entry("make deploy", Some(1))]);
        assert_eq!(delta, WorklogDelta::Replaced);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.entries()[0].command_line(), "make deploy");
    }

    #[test]
    fn identical_refresh_reports_unchanged() {
        let mut buffer = WorklogBuffer::new();
        let list = vec![entry("git pull", Some(0))];
        assert!(buffer.replace(list.clone()).changed());
        assert_eq!(buffer.replace(list), WorklogDelta::Unchanged);
    }

    #[test]
    fn tail_growth_is_reported_as_extension() {
        let mut buffer = WorklogBuffer::new();
        buffer.replace(vec![entry("git pull", Some(0))]);

        let delta = buffer.replace(vec![
            entry("git pull", Some(0)),
            entry("make bake", None),
            entry("make push", None),
        ]);
        assert_eq!(delta, WorklogDelta::Extended { added: 2 });
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn in_place_mutation_of_a_running_entry_is_a_replacement() {
        // The tail entry's output grows while it runs; the old list is
        // no longer a prefix, so this is not an extension.
        let mut buffer = WorklogBuffer::new();
        buffer.replace(vec![entry("make bake", None)]);

        let finished = vec![WorklogEntry {
            command: vec!["make".into(), "bake".into()],
            output: "done\n".into(),
            code: Some(0),
        }];
        assert_eq!(buffer.replace(finished), WorklogDelta::Replaced);
    }

    #[test]
    fn server_order_is_preserved_verbatim() {
        let mut buffer = WorklogBuffer::new();
        let list = vec![entry("b", Some(0)), entry("a", Some(0)), entry("b", Some(0))];
        buffer.replace(list.clone());
        assert_eq!(buffer.entries(), &list[..]);
    }
}

use std::fmt::Display;

/// The id of a process, or of the process group it leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(libc::pid_t);

impl ProcessId {
    pub fn new(id: libc::pid_t) -> Self {
        Self(id)
    }

    pub fn get(&self) -> libc::pid_t {
        self.0
    }

    /// Whether this id can name a real process (`fork` never hands out ids below 1).
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl Display for ProcessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::ProcessId;

    #[test]
    fn validity() {
        assert!(ProcessId::new(1).is_valid());
        assert!(!ProcessId::new(0).is_valid());
        assert!(!ProcessId::new(-1).is_valid());
        assert_eq!(ProcessId::new(42).to_string(), "42");
    }
}

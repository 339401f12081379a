//! A string wrapper whose [`Debug`] and [`Display`] impls never print the
//! wrapped value, for passwords and other connection secrets that would
//! otherwise leak into `tracing` spans or panic messages.

use std::fmt;
use std::ops::Deref;

/// A value that should never appear in logs, debug output, or error
/// messages verbatim.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Redacted(String);

impl Redacted {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Redacted(value.into())
    }

    /// Access the underlying value. Named loudly so call sites make the
    /// unmasking visible at the point of use.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Redacted {
    fn from(value: String) -> Self {
        Redacted(value)
    }
}

impl Deref for Redacted {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Redacted(..)")
    }
}

impl fmt::Display for Redacted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "******")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_never_leak_the_secret() {
        let r = Redacted::new("hunter2");
        assert_eq!(format!("{:?}", r), "Redacted(..)");
        assert_eq!(format!("{}", r), "******");
        assert_eq!(r.expose(), "hunter2");
    }
}

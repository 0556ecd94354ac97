use std::fmt;

/// Classification tag for a failed upstream DNSBL lookup. Stored as text in
/// the durable cache so the tag set must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupErrorKind {
    /// The lookup exceeded its per-call deadline.
    Timeout,
    /// Connect/send/receive failure or a malformed upstream answer.
    Network,
    /// The upstream server reported failure (SERVFAIL, REFUSED, ...).
    UpstreamServfail,
}

impl LookupErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::UpstreamServfail => "upstream_servfail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "network" => Some(Self::Network),
            "upstream_servfail" => Some(Self::UpstreamServfail),
            _ => None,
        }
    }
}

impl fmt::Display for LookupErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_tags() {
        for kind in [
            LookupErrorKind::Timeout,
            LookupErrorKind::Network,
            LookupErrorKind::UpstreamServfail,
        ] {
            assert_eq!(LookupErrorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(LookupErrorKind::parse("bogus"), None);
    }
}

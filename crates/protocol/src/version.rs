//! Protocol version management

/// Protocol version implemented by this agent
///
/// A parent announcing a newer version in `HELLO` is still answered with
/// this version; the parent is expected to downgrade.
pub const PROTOCOL_VERSION: u32 = 1;

/// Version to report back to a parent that announced `requested`
pub fn negotiate(requested: u32) -> u32 {
    requested.min(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_never_exceeds_supported() {
        assert_eq!(negotiate(1), 1);
        assert_eq!(negotiate(7), PROTOCOL_VERSION);
    }
}

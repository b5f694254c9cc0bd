//! Wire protocol versioning.
//!
//! The envelope carries a single version byte (`v`). There is no negotiation:
//! the server speaks exactly one version and rejects anything else at decode
//! time, before the type tag is even looked at.

/// Current wire protocol version.
pub const WIRE_VERSION: u8 = 1;

/// Check whether an envelope version can be handled by this server.
#[must_use]
pub fn is_supported(version: u8) -> bool {
    version == WIRE_VERSION
}

/// Serde default for the envelope version field.
///
/// Clients predating the version field omit it; those speak version 1.
pub(crate) fn wire_default() -> u8 {
    WIRE_VERSION
}

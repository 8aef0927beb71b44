//! Process-wide defaults, in the spirit of the teacher's `lazy_static!`
//! globals (`DefaultOption`, the zero-value `Server`) but built on
//! `once_cell`, which is what this corpus reaches for when a project isn't
//! already committed to `lazy_static`.

use crate::message::HandshakeOption;
use crate::server::Server;
use once_cell::sync::Lazy;

/// The handshake options a bare `dial(addr)` or `Server::accept` uses when
/// the caller hasn't built one explicitly: JSON codec, a 10s connect
/// timeout, no handle timeout.
pub static DEFAULT_OPTION: Lazy<HandshakeOption> = Lazy::new(HandshakeOption::default);

/// A process-wide `Server` with no services registered, mirroring the
/// reference implementation's package-level default server. Most
/// applications will want their own `Server::builder()` instead; this
/// exists for the handful of call sites (quick scripts, doctests) that
/// just want *a* server to register against.
pub static DEFAULT_SERVER: Lazy<Server> = Lazy::new(Server::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_option_has_the_canonical_magic_number() {
        assert!(DEFAULT_OPTION.validate());
    }

    #[test]
    fn default_server_starts_with_no_services() {
        assert_eq!(DEFAULT_SERVER.call_count("Arith.sum"), None);
    }
}

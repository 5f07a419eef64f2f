//! SASL authentication payloads for capability negotiation.
//!
//! Only the mechanisms the framework speaks as a client: PLAIN and
//! EXTERNAL. The exchange itself (AUTHENTICATE lines, result numerics)
//! lives in the connection's registration state machine; this module builds
//! the payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Supported SASL mechanisms.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mechanism {
    /// RFC 4616 username/password.
    Plain,
    /// RFC 4422 external authentication, typically a TLS client cert.
    External,
}

impl Mechanism {
    /// Wire name used in `AUTHENTICATE <mech>`.
    pub fn name(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::External => "EXTERNAL",
        }
    }

    /// Parses a configured mechanism name, case-insensitively.
    pub fn from_name(name: &str) -> Option<Mechanism> {
        if name.eq_ignore_ascii_case("PLAIN") {
            Some(Mechanism::Plain)
        } else if name.eq_ignore_ascii_case("EXTERNAL") {
            Some(Mechanism::External)
        } else {
            None
        }
    }
}

/// Credentials for one SASL exchange.
#[derive(Clone, Debug, Default)]
pub struct Credentials {
    /// Authorization identity. Usually empty (derived from the
    /// authentication identity by the server).
    pub authzid: String,
    /// Authentication identity (the account name).
    pub authcid: String,
    /// Password, used by PLAIN only.
    pub password: String,
}

/// Builds the base64 response to the server's `AUTHENTICATE +` challenge.
///
/// PLAIN encodes `authzid NUL authcid NUL password`; EXTERNAL encodes the
/// authorization identity alone, which degenerates to a bare `+` when it is
/// empty.
pub fn respond(mechanism: Mechanism, creds: &Credentials) -> String {
    match mechanism {
        Mechanism::Plain => {
            let mut raw = Vec::new();
            raw.extend_from_slice(creds.authzid.as_bytes());
            raw.push(0);
            raw.extend_from_slice(creds.authcid.as_bytes());
            raw.push(0);
            raw.extend_from_slice(creds.password.as_bytes());
            STANDARD.encode(raw)
        }
        Mechanism::External => {
            if creds.authzid.is_empty() {
                "+".to_owned()
            } else {
                STANDARD.encode(creds.authzid.as_bytes())
            }
        }
    }
}

/// Numerics 902 through 907 all terminate the SASL exchange, whatever the
/// outcome.
pub fn is_result_numeric(command: &str) -> bool {
    matches!(command, "902" | "903" | "904" | "905" | "906" | "907")
}

/// Numeric 903 is the lone success outcome.
pub fn is_success_numeric(command: &str) -> bool {
    command == "903"
}

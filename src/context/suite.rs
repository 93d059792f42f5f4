//! The two TLS 1.2 cipher suites this crate negotiates.
//!
//! Both use AES-128 in CBC mode with an HMAC-SHA256 record MAC and RSA
//! certificates; they differ only in key agreement:
//! - `TLS_DHE_RSA_WITH_AES_128_CBC_SHA256` (0x0067), forward secret
//! - `TLS_RSA_WITH_AES_128_CBC_SHA256` (0x003C), static RSA key transport

use std::fmt;

use crate::config::KeyExchangeMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CipherSuite {
    /// TLS_DHE_RSA_WITH_AES_128_CBC_SHA256 (0x0067) - RFC 5246
    DheRsaAes128CbcSha256 = 0x0067,

    /// TLS_RSA_WITH_AES_128_CBC_SHA256 (0x003C) - RFC 5246
    RsaAes128CbcSha256 = 0x003C,
}

impl CipherSuite {
    pub const ALL: [CipherSuite; 2] = [
        CipherSuite::RsaAes128CbcSha256,
        CipherSuite::DheRsaAes128CbcSha256,
    ];

    /// Create from wire format.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0067 => Some(CipherSuite::DheRsaAes128CbcSha256),
            0x003C => Some(CipherSuite::RsaAes128CbcSha256),
            _ => None,
        }
    }

    /// Convert to wire format.
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Name OpenSSL uses in cipher lists and reports after a handshake.
    pub const fn openssl_name(self) -> &'static str {
        match self {
            CipherSuite::DheRsaAes128CbcSha256 => "DHE-RSA-AES128-SHA256",
            CipherSuite::RsaAes128CbcSha256 => "AES128-SHA256",
        }
    }

    pub const fn iana_name(self) -> &'static str {
        match self {
            CipherSuite::DheRsaAes128CbcSha256 => "TLS_DHE_RSA_WITH_AES_128_CBC_SHA256",
            CipherSuite::RsaAes128CbcSha256 => "TLS_RSA_WITH_AES_128_CBC_SHA256",
        }
    }

    pub fn from_openssl_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.openssl_name() == name)
    }

    pub const fn key_exchange(self) -> KeyExchangeMode {
        match self {
            CipherSuite::DheRsaAes128CbcSha256 => KeyExchangeMode::Dhe,
            CipherSuite::RsaAes128CbcSha256 => KeyExchangeMode::Rsa,
        }
    }

    /// Whether the suite needs DH parameters on the server.
    pub const fn is_ephemeral(self) -> bool {
        matches!(self, CipherSuite::DheRsaAes128CbcSha256)
    }

    /// OpenSSL cipher-list string enabling exactly `suites`, in order.
    pub fn cipher_list(suites: &[CipherSuite]) -> String {
        suites
            .iter()
            .map(|s| s.openssl_name())
            .collect::<Vec<_>>()
            .join(":")
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.openssl_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values() {
        assert_eq!(CipherSuite::DheRsaAes128CbcSha256.to_u16(), 0x0067);
        assert_eq!(CipherSuite::RsaAes128CbcSha256.to_u16(), 0x003C);
        assert_eq!(
            CipherSuite::from_u16(0x0067),
            Some(CipherSuite::DheRsaAes128CbcSha256)
        );
        assert_eq!(CipherSuite::from_u16(0xC02F), None);
    }

    #[test]
    fn openssl_names_map_back() {
        for suite in CipherSuite::ALL {
            assert_eq!(CipherSuite::from_openssl_name(suite.openssl_name()), Some(suite));
        }
        assert_eq!(CipherSuite::from_openssl_name("ECDHE-RSA-AES128-GCM-SHA256"), None);
    }

    #[test]
    fn cipher_list_joins_in_order() {
        assert_eq!(
            CipherSuite::cipher_list(&CipherSuite::ALL),
            "AES128-SHA256:DHE-RSA-AES128-SHA256"
        );
        assert_eq!(
            CipherSuite::cipher_list(&[CipherSuite::DheRsaAes128CbcSha256]),
            "DHE-RSA-AES128-SHA256"
        );
    }

    #[test]
    fn only_dhe_is_ephemeral() {
        assert!(CipherSuite::DheRsaAes128CbcSha256.is_ephemeral());
        assert!(!CipherSuite::RsaAes128CbcSha256.is_ephemeral());
    }
}

//! Development PKI: a throwaway CA plus server and client identities.
//!
//! Produces the same file layout the binaries expect by default:
//!
//! | file         | contents                                   |
//! |--------------|--------------------------------------------|
//! | `ca.pem`     | self-signed RSA-2048 CA                    |
//! | `server.pem` | server leaf (serverAuth, SAN localhost/127.0.0.1) |
//! | `server.key` | server private key (PKCS#8)                |
//! | `client.pem` | client leaf (clientAuth)                   |
//! | `client.key` | client private key (PKCS#8)                |
//! | `dh.pem`     | finite-field DH parameters                 |
//!
//! Not for production use: keys are written unencrypted.

use std::fs;
use std::path::{Path, PathBuf};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::dh::Dh;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Params, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{
    BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName, SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509NameBuilder, X509Ref, X509};

use crate::config::Identity;
use crate::error::PkiError;

/// Where the DH parameters come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DhSource {
    /// The RFC 5114 2048-bit MODP group with 256-bit subgroup. Instant.
    Rfc5114,
    /// Freshly generated safe-prime parameters of the given size. Slow.
    Generate(u32),
}

/// Options for [`generate`].
#[derive(Debug, Clone)]
pub struct PkiOptions {
    /// RSA modulus size for every key (default: 2048).
    pub key_bits: u32,
    /// Certificate lifetime in days (default: 365).
    pub validity_days: u32,
    /// Common name of the CA (default: "tls12-mutual dev CA").
    pub ca_name: String,
    /// DNS name placed in the server certificate (default: "localhost").
    pub server_name: String,
    /// Common name of the client certificate (default: "tls12-mutual client").
    pub client_name: String,
    pub dh: DhSource,
}

impl Default for PkiOptions {
    fn default() -> Self {
        Self {
            key_bits: 2048,
            validity_days: 365,
            ca_name: "tls12-mutual dev CA".into(),
            server_name: "localhost".into(),
            client_name: "tls12-mutual client".into(),
            dh: DhSource::Rfc5114,
        }
    }
}

/// Paths of a generated PKI.
#[derive(Debug, Clone)]
pub struct DevPki {
    dir: PathBuf,
}

impl DevPki {
    /// Refer to an existing PKI directory with the standard layout.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ca_cert(&self) -> PathBuf {
        self.dir.join("ca.pem")
    }

    pub fn server_identity(&self) -> Identity {
        Identity::new(self.dir.join("server.pem"), self.dir.join("server.key"))
    }

    pub fn client_identity(&self) -> Identity {
        Identity::new(self.dir.join("client.pem"), self.dir.join("client.key"))
    }

    pub fn dh_params(&self) -> PathBuf {
        self.dir.join("dh.pem")
    }
}

enum LeafUsage {
    Server,
    Client,
}

/// Generate a CA, a server and a client identity, and DH parameters into
/// `dir`, creating it if needed. Existing files are overwritten.
pub fn generate(dir: &Path, opts: &PkiOptions) -> Result<DevPki, PkiError> {
    fs::create_dir_all(dir).map_err(|source| PkiError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let pki = DevPki::at(dir);

    let (ca_key, ca_cert) = generate_ca(opts)?;
    let (server_key, server_cert) = issue_leaf(&ca_key, &ca_cert, opts, LeafUsage::Server)?;
    let (client_key, client_cert) = issue_leaf(&ca_key, &ca_cert, opts, LeafUsage::Client)?;
    let dh = dh_params(opts.dh)?;

    let server = pki.server_identity();
    let client = pki.client_identity();
    write(&pki.ca_cert(), &ca_cert.to_pem()?)?;
    write(&server.cert_path, &server_cert.to_pem()?)?;
    write(&server.key_path, &server_key.private_key_to_pem_pkcs8()?)?;
    write(&client.cert_path, &client_cert.to_pem()?)?;
    write(&client.key_path, &client_key.private_key_to_pem_pkcs8()?)?;
    write(&pki.dh_params(), &dh.params_to_pem()?)?;

    tracing::debug!(dir = %dir.display(), "development PKI written");
    Ok(pki)
}

/// Produce DH parameters from `source`.
pub fn dh_params(source: DhSource) -> Result<Dh<Params>, PkiError> {
    let dh = match source {
        DhSource::Rfc5114 => Dh::get_2048_256()?,
        DhSource::Generate(bits) => Dh::generate_params(bits, 2)?,
    };
    Ok(dh)
}

fn write(path: &Path, contents: &[u8]) -> Result<(), PkiError> {
    fs::write(path, contents).map_err(|source| PkiError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn random_serial(builder: &mut X509Builder) -> Result<(), PkiError> {
    let mut serial = BigNum::new()?;
    serial.rand(127, MsbOption::MAYBE_ZERO, false)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    Ok(())
}

fn set_validity(builder: &mut X509Builder, days: u32) -> Result<(), PkiError> {
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(days)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    Ok(())
}

fn generate_ca(opts: &PkiOptions) -> Result<(PKey<Private>, X509), PkiError> {
    let key = PKey::from_rsa(Rsa::generate(opts.key_bits)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", &opts.ca_name)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    random_serial(&mut builder)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    set_validity(&mut builder, opts.validity_days)?;

    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(KeyUsage::new().critical().key_cert_sign().crl_sign().build()?)?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;

    builder.sign(&key, MessageDigest::sha256())?;
    Ok((key, builder.build()))
}

fn issue_leaf(
    ca_key: &PKey<Private>,
    ca_cert: &X509,
    opts: &PkiOptions,
    usage: LeafUsage,
) -> Result<(PKey<Private>, X509), PkiError> {
    let key = PKey::from_rsa(Rsa::generate(opts.key_bits)?)?;
    let cn = match usage {
        LeafUsage::Server => &opts.server_name,
        LeafUsage::Client => &opts.client_name,
    };

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", cn)?;
    let name = name.build();

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    random_serial(&mut builder)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(ca_cert.subject_name())?;
    builder.set_pubkey(&key)?;
    set_validity(&mut builder, opts.validity_days)?;

    builder.append_extension(BasicConstraints::new().build()?)?;
    // keyEncipherment is needed for static RSA key transport.
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?,
    )?;
    match usage {
        LeafUsage::Server => {
            builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
            let issuer: &X509Ref = ca_cert;
            let san = SubjectAlternativeName::new()
                .dns(&opts.server_name)
                .ip("127.0.0.1")
                .build(&builder.x509v3_context(Some(issuer), None))?;
            builder.append_extension(san)?;
        }
        LeafUsage::Client => {
            builder.append_extension(ExtendedKeyUsage::new().client_auth().build()?)?;
        }
    }

    builder.sign(ca_key, MessageDigest::sha256())?;
    Ok((key, builder.build()))
}

pub mod config;
pub mod netmon_cert_verifier;

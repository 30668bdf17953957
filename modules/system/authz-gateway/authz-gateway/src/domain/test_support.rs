//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use authz_gateway_sdk::{MetadataClient, MetadataError};
use bytes::Bytes;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkcs7::{Pkcs7, Pkcs7Flags};
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::x509::{X509, X509NameBuilder};

use super::transport::{DecisionTransport, TransportFailure, TransportResponse};

pub const IDENTITY_DOCUMENT: &str = r#"{
  "accountId": "123456789012",
  "architecture": "x86_64",
  "availabilityZone": "us-east-1a",
  "billingProducts": null,
  "imageId": "ami-0abcdef1234567890",
  "instanceId": "i-0abc1234def567890",
  "instanceType": "m5.large",
  "pendingTime": "2026-09-01T12:00:00Z",
  "privateIp": "10.0.0.5",
  "region": "us-east-1",
  "version": "2017-09-30"
}"#;

/// Self-signed RSA certificate and its key.
pub fn mint_identity(common_name: &str, serial: u32) -> (X509, PKey<Private>) {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(serial).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

/// PKCS#7 signed-data envelope (DER) with the payload attached.
pub fn sign(cert: &X509, key: &PKey<Private>, payload: &[u8]) -> Vec<u8> {
    let extra = Stack::new().unwrap();
    Pkcs7::sign(cert, key, &extra, payload, Pkcs7Flags::BINARY)
        .unwrap()
        .to_der()
        .unwrap()
}

/// In-memory metadata service that counts reads.
#[derive(Default)]
pub struct FakeMetadata {
    paths: Mutex<HashMap<String, Bytes>>,
    signed: Mutex<Option<Bytes>>,
    reads: AtomicUsize,
    signed_reads: AtomicUsize,
}

impl FakeMetadata {
    pub fn set(&self, path: &str, body: impl Into<Bytes>) {
        self.paths
            .lock()
            .unwrap()
            .insert(path.to_owned(), body.into());
    }

    pub fn set_signed(&self, envelope: Option<Bytes>) {
        *self.signed.lock().unwrap() = envelope;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn signed_reads(&self) -> usize {
        self.signed_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn get(&self, path: &str) -> Result<Bytes, MetadataError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent callers actually interleave.
        tokio::task::yield_now().await;
        self.paths
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| MetadataError::Status {
                path: path.to_owned(),
                status: 404,
            })
    }

    async fn signed_document(&self) -> Result<Bytes, MetadataError> {
        self.signed_reads.fetch_add(1, Ordering::SeqCst);
        self.signed
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MetadataError::Unreachable("connection refused".to_owned()))
    }
}

/// Answers every call the same way and keeps the posted bodies.
pub struct RecordingTransport {
    outcome: Result<TransportResponse, TransportFailure>,
    bodies: Mutex<Vec<Bytes>>,
}

impl RecordingTransport {
    pub fn answering(status: u16, body: &str) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            outcome: Ok(TransportResponse {
                status,
                body: Bytes::from(body.to_owned()),
            }),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            outcome: Err(TransportFailure::Connect("connection refused".to_owned())),
            bodies: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.bodies.lock().unwrap().len()
    }

    /// The `input` member of the last posted envelope.
    pub fn last_input(&self) -> serde_json::Value {
        let bodies = self.bodies.lock().unwrap();
        let body = bodies.last().unwrap();
        let mut envelope: serde_json::Value = serde_json::from_slice(body).unwrap();
        envelope["input"].take()
    }
}

#[async_trait]
impl DecisionTransport for RecordingTransport {
    async fn post_json(
        &self,
        _endpoint: &str,
        body: Bytes,
    ) -> Result<TransportResponse, TransportFailure> {
        self.bodies.lock().unwrap().push(body);
        self.outcome.clone()
    }
}

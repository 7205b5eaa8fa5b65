//! SCRAM-SHA-256 client (RFC 5802, RFC 7677).
//!
//! 1. client-first: `n,,n=user,r=nonce`
//! 2. server-first: `r=nonce+server,s=salt,i=iterations`
//! 3. client-final: `c=biws,r=nonce+server,p=proof`
//! 4. server-final: `v=verifier`
//!
//! Channel binding is not offered. Usernames are escaped but not
//! SASLprep-normalized.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::Mechanism;
use crate::error::SaslError;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes in the client nonce.
const NONCE_LEN: usize = 18;

/// Upper bound on the server-chosen PBKDF2 iteration count.
const MAX_ITERATIONS: u32 = 1_000_000;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ScramError {
    #[error("server message is not valid UTF-8 or base64")]
    InvalidEncoding,

    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,

    #[error("server message lacks the {0} attribute")]
    MissingAttribute(char),

    #[error("invalid iteration count")]
    InvalidIterations,

    #[error("server signature mismatch")]
    ServerVerificationFailed,

    #[error("server reported: {0}")]
    Server(String),

    #[error("message received after the exchange completed")]
    UnexpectedMessage,

    #[error("no randomness available for the nonce")]
    Random,
}

enum State {
    Initial,
    ClientFirstSent { bare: String },
    ClientFinalSent { server_signature: Vec<u8> },
    Complete,
}

pub struct ScramClient {
    gs2_header: String,
    username: String,
    password: String,
    nonce: String,
    state: State,
}

impl ScramClient {
    pub fn new(identity: Option<String>, username: &str, password: &str) -> Result<Self, ScramError> {
        let mut raw = [0u8; NONCE_LEN];
        getrandom::getrandom(&mut raw).map_err(|_| ScramError::Random)?;
        Ok(Self::with_nonce(identity, username, password, BASE64.encode(raw)))
    }

    fn with_nonce(identity: Option<String>, username: &str, password: &str, nonce: String) -> Self {
        let gs2_header = match identity.filter(|id| !id.is_empty()) {
            Some(id) => format!("n,a={},", escape(&id)),
            None => "n,,".to_owned(),
        };
        ScramClient {
            gs2_header,
            username: escape(username),
            password: password.to_owned(),
            nonce,
            state: State::Initial,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Advance the exchange with the next decoded server message.
    pub fn step(&mut self, challenge: &[u8]) -> Result<Vec<u8>, ScramError> {
        match std::mem::replace(&mut self.state, State::Complete) {
            State::Initial => {
                let bare = format!("n={},r={}", self.username, self.nonce);
                let first = format!("{}{}", self.gs2_header, bare);
                self.state = State::ClientFirstSent { bare };
                Ok(first.into_bytes())
            }
            State::ClientFirstSent { bare } => {
                let server_first =
                    std::str::from_utf8(challenge).map_err(|_| ScramError::InvalidEncoding)?;
                let (final_message, server_signature) = self.client_final(&bare, server_first)?;
                self.state = State::ClientFinalSent { server_signature };
                Ok(final_message.into_bytes())
            }
            State::ClientFinalSent { server_signature } => {
                let server_final =
                    std::str::from_utf8(challenge).map_err(|_| ScramError::InvalidEncoding)?;
                if let Some(error) = attribute(server_final, 'e') {
                    return Err(ScramError::Server(error.to_owned()));
                }
                let verifier = attribute(server_final, 'v').ok_or(ScramError::MissingAttribute('v'))?;
                let verifier = BASE64
                    .decode(verifier)
                    .map_err(|_| ScramError::InvalidEncoding)?;
                if verifier != server_signature {
                    return Err(ScramError::ServerVerificationFailed);
                }
                Ok(Vec::new())
            }
            State::Complete => Err(ScramError::UnexpectedMessage),
        }
    }

    fn client_final(&self, bare: &str, server_first: &str) -> Result<(String, Vec<u8>), ScramError> {
        let nonce = attribute(server_first, 'r').ok_or(ScramError::MissingAttribute('r'))?;
        let salt = attribute(server_first, 's').ok_or(ScramError::MissingAttribute('s'))?;
        let iterations = attribute(server_first, 'i').ok_or(ScramError::MissingAttribute('i'))?;

        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ScramError::NonceMismatch);
        }
        let salt = BASE64.decode(salt).map_err(|_| ScramError::InvalidEncoding)?;
        let iterations: u32 = iterations
            .parse()
            .map_err(|_| ScramError::InvalidIterations)?;
        if iterations == 0 || iterations > MAX_ITERATIONS {
            return Err(ScramError::InvalidIterations);
        }

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2::<HmacSha256>(self.password.as_bytes(), &salt, iterations, &mut salted)
            .map_err(|_| ScramError::InvalidIterations)?;

        let without_proof = format!(
            "c={},r={}",
            BASE64.encode(self.gs2_header.as_bytes()),
            nonce
        );
        let auth_message = format!("{},{},{}", bare, server_first, without_proof);

        let client_key = hmac_sha256(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);
        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted, b"Server Key")?;
        let server_signature = hmac_sha256(&server_key, auth_message.as_bytes())?;

        let message = format!("{},p={}", without_proof, BASE64.encode(proof));
        Ok((message, server_signature))
    }
}

impl Mechanism for ScramClient {
    fn name(&self) -> &'static str {
        "SCRAM-SHA-256"
    }

    fn respond(&mut self, challenge: &[u8]) -> Result<Vec<u8>, SaslError> {
        Ok(self.step(challenge)?)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ScramError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| ScramError::InvalidEncoding)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn attribute(message: &str, name: char) -> Option<&str> {
    message.split(',').find_map(|part| {
        let mut chars = part.chars();
        (chars.next() == Some(name) && chars.next() == Some('=')).then(|| &part[2..])
    })
}

fn escape(name: &str) -> String {
    name.replace('=', "=3D").replace(',', "=2C")
}

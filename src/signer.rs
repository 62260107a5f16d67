// {{{ Copyright (c) cvdkit contributors, 2025
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE. }}}

//! Client for the remote signing service. Grounded on `getdsig()` in
//! `sigtool/sigtool.c`: connect, write a `ClamSign:`/`ClamSignPSS:` request
//! carrying the credentials and a raw binary digest, read back an ASCII
//! reply, and pull the signature out of a `Signature:` prefix.
//!
//! The password is taken as a value here rather than read interactively,
//! per the host/core split: a CLI front-end is responsible for sourcing it
//! from `$SIGNDPASS` or a terminal prompt with echo suppressed and handing
//! the result in.

use std::{
    io::{Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

/// Default TCP port the remote signer listens on.
pub const DEFAULT_PORT: u16 = 33101;

/// Which request prefix (and therefore digest algorithm) to use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignMode {
    /// `ClamSign:` — mode 0, a 16-byte (MD5) digest.
    Cvd,
    /// `ClamSignPSS:` — mode 1, a 32-byte (SHA-256) digest.
    Cdiff,
}

impl SignMode {
    fn prefix(self) -> &'static str {
        match self {
            SignMode::Cvd => "ClamSign",
            SignMode::Cdiff => "ClamSignPSS",
        }
    }
}

/// Errors encountered talking to the remote signer.
#[derive(Debug)]
pub enum SignerError {
    Io(std::io::Error),
    /// The response didn't contain a `Signature:` marker.
    NoSignature,
}
crate::errors::error_enum!(SignerError);

impl From<std::io::Error> for SignerError {
    fn from(e: std::io::Error) -> Self {
        SignerError::Io(e)
    }
}

/// A connection to a remote signer, holding credentials for the duration of
/// one or more signing round-trips.
pub struct SignerClient {
    user: String,
    password: String,
    timeout: Duration,
}

impl SignerClient {
    pub fn new(user: impl Into<String>, password: impl Into<String>, timeout: Duration) -> Self {
        SignerClient {
            user: user.into(),
            password: password.into(),
            timeout,
        }
    }

    /// Request a detached signature over `digest` from `host`, per
    /// `getdsig()`'s wire protocol. The returned string is the raw ASCII
    /// signature text (no further decoding).
    pub fn sign(&self, host: impl ToSocketAddrs, digest: &[u8], mode: SignMode) -> Result<String, SignerError> {
        let mut stream = connect_first(host)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut request = format!("{}:{}:{}:", mode.prefix(), self.user, self.password).into_bytes();
        request.extend_from_slice(digest);
        stream.write_all(&request)?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;
        let response = String::from_utf8_lossy(&response);

        let signature = response
            .find("Signature:")
            .map(|idx| response[idx + "Signature:".len()..].to_owned())
            .ok_or(SignerError::NoSignature)?;

        Ok(signature)
    }
}

fn connect_first(host: impl ToSocketAddrs) -> std::io::Result<TcpStream> {
    let addr = host
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::AddrNotAvailable))?;
    TcpStream::connect(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::TcpListener, thread};

    #[test]
    fn sign_parses_signature_prefix_from_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let n = stream.read(&mut buf).unwrap();
            assert!(buf[..n].starts_with(b"ClamSign:builder:secret:"));
            stream.write_all(b"Signature:deadbeefcafe").unwrap();
        });

        let client = SignerClient::new("builder", "secret", Duration::from_secs(5));
        let sig = client.sign(addr, b"0123456789abcdef", SignMode::Cvd).unwrap();
        assert_eq!(sig, "deadbeefcafe");

        handle.join().unwrap();
    }

    #[test]
    fn sign_fails_without_signature_marker() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(b"Error: bad credentials").unwrap();
        });

        let client = SignerClient::new("builder", "secret", Duration::from_secs(5));
        let err = client.sign(addr, b"digest", SignMode::Cdiff).unwrap_err();
        assert!(matches!(err, SignerError::NoSignature));

        handle.join().unwrap();
    }
}

//! Username/password authentication handler
//!
//! Implements RFC 1929 username/password authentication for SOCKS5.

use super::Authenticator;
use crate::socks::consts::{SOCKS5_AUTH_METHOD_PASSWORD, SOCKS5_AUTH_VERSION};
use crate::transport::StreamDyn;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Authentication result codes
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;

/// Username/password authenticator backed by a static user table
#[derive(Clone, Default)]
pub struct PasswordAuth {
    users: HashMap<String, String>,
}

impl fmt::Debug for PasswordAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordAuth")
            .field("users", &self.users.len())
            .finish()
    }
}

impl PasswordAuth {
    /// Create an authenticator from `(username, password)` pairs
    pub fn new<I, U, P>(users: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        PasswordAuth {
            users: users
                .into_iter()
                .map(|(u, p)| (u.into(), p.into()))
                .collect(),
        }
    }

    /// Create an authenticator accepting a single user
    pub fn single(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::new([(username, password)])
    }

    /// Number of configured users
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .map(|expected| expected == password)
            .unwrap_or(false)
    }
}

#[async_trait]
impl Authenticator for PasswordAuth {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_PASSWORD
    }

    /// # Protocol
    ///
    /// Client sends:
    /// ```text
    /// +----+------+----------+------+----------+
    /// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
    /// +----+------+----------+------+----------+
    /// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
    /// +----+------+----------+------+----------+
    /// ```
    ///
    /// Server responds with `VER STATUS`, status 0 meaning success.
    async fn authenticate(&self, stream: &mut dyn StreamDyn) -> Result<()> {
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).await?;

        let [version, username_len] = buf;

        if version != SOCKS5_AUTH_VERSION {
            send_auth_result(stream, AUTH_FAILURE).await?;
            bail!("Invalid auth version: {}", version);
        }

        if username_len == 0 {
            send_auth_result(stream, AUTH_FAILURE).await?;
            bail!("Invalid username length: {}", username_len);
        }

        let mut username = vec![0u8; username_len as usize];
        stream.read_exact(&mut username).await?;

        let password_len = stream.read_u8().await?;
        if password_len == 0 {
            send_auth_result(stream, AUTH_FAILURE).await?;
            bail!("Invalid password length: {}", password_len);
        }

        let mut password = vec![0u8; password_len as usize];
        stream.read_exact(&mut password).await?;

        let username = String::from_utf8_lossy(&username);
        let password = String::from_utf8_lossy(&password);

        if self.verify(&username, &password) {
            send_auth_result(stream, AUTH_SUCCESS).await?;
            tracing::debug!("Authentication successful for user: {}", username);
            Ok(())
        } else {
            send_auth_result(stream, AUTH_FAILURE).await?;
            bail!("Authentication failed for user: {}", username);
        }
    }
}

/// Send authentication result to client
async fn send_auth_result<S>(stream: &mut S, status: u8) -> Result<()>
where
    S: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn create_auth_request(username: &str, password: &str) -> Vec<u8> {
        let mut request = vec![SOCKS5_AUTH_VERSION, username.len() as u8];
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());
        request
    }

    async fn run_auth(auth: &PasswordAuth, request: Vec<u8>) -> (Result<()>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(&request).await.unwrap();

        let result = auth.authenticate(&mut server).await;
        drop(server);

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        (result, response)
    }

    #[tokio::test]
    async fn test_authenticate_success() {
        let auth = PasswordAuth::single("testuser", "testpass");
        let (result, response) = run_auth(&auth, create_auth_request("testuser", "testpass")).await;

        assert!(result.is_ok());
        assert_eq!(response, vec![SOCKS5_AUTH_VERSION, AUTH_SUCCESS]);
    }

    #[tokio::test]
    async fn test_authenticate_multiple_users() {
        let auth = PasswordAuth::new([("alice", "a1"), ("bob", "b2")]);
        assert_eq!(auth.user_count(), 2);

        let (result, _) = run_auth(&auth, create_auth_request("bob", "b2")).await;
        assert!(result.is_ok());

        let (result, _) = run_auth(&auth, create_auth_request("bob", "a1")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_authenticate_wrong_password() {
        let auth = PasswordAuth::single("user", "correctpass");
        let (result, response) = run_auth(&auth, create_auth_request("user", "wrongpass")).await;

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Authentication failed"));
        assert_eq!(response, vec![SOCKS5_AUTH_VERSION, AUTH_FAILURE]);
    }

    #[tokio::test]
    async fn test_authenticate_unknown_user() {
        let auth = PasswordAuth::single("correctuser", "pass");
        let (result, response) = run_auth(&auth, create_auth_request("wronguser", "pass")).await;

        assert!(result.is_err());
        assert_eq!(response[1], AUTH_FAILURE);
    }

    #[tokio::test]
    async fn test_authenticate_invalid_version() {
        let auth = PasswordAuth::single("user", "pass");
        let mut request = create_auth_request("user", "pass");
        request[0] = 0xFF;

        let (result, response) = run_auth(&auth, request).await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid auth version"));
        assert_eq!(response, vec![SOCKS5_AUTH_VERSION, AUTH_FAILURE]);
    }

    #[tokio::test]
    async fn test_authenticate_zero_username_length() {
        let auth = PasswordAuth::single("user", "pass");
        let (result, _) = run_auth(&auth, create_auth_request("", "pass")).await;

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid username length"));
    }

    #[tokio::test]
    async fn test_authenticate_zero_password_length() {
        let auth = PasswordAuth::single("user", "pass");
        let (result, _) = run_auth(&auth, create_auth_request("user", "")).await;

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid password length"));
    }

    #[test]
    fn test_debug_hides_passwords() {
        let auth = PasswordAuth::single("user", "hunter2");
        let debug = format!("{:?}", auth);
        assert!(!debug.contains("hunter2"));
    }
}

use crate::codec::{AuthReply, Greeting, MethodSelection, UserPassRequest};
use crate::error::Socks5Error;
use crate::protocol::{AuthMethod, AuthStatus, Version};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// CredentialValidator decides whether a username/password pair may use
/// the proxy
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, username: &[u8], password: &[u8]) -> bool;
}

/// AcceptAll lets every account through. This is the default when no
/// credentials are configured
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl CredentialValidator for AcceptAll {
    fn validate(&self, _username: &[u8], _password: &[u8]) -> bool {
        true
    }
}

/// UserPass holds username/password credentials as dictated
/// server-side
#[derive(Clone)]
pub struct UserPass {
    pub username: String,
    pub password: String,
}

impl CredentialValidator for UserPass {
    fn validate(&self, username: &[u8], password: &[u8]) -> bool {
        username == self.username.as_bytes() && password == self.password.as_bytes()
    }
}

impl std::fmt::Debug for UserPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserPass")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// AuthResult is the outcome of a completed authentication phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub method: AuthMethod,
    /// Account name accepted during username/password sub-negotiation
    pub identity: Option<String>,
}

/// negotiate_method reads the client greeting, picks a method and sends the
/// selection. When nothing offered is acceptable the 0xFF selection is sent
/// and the session must end
pub async fn negotiate_method<S>(stream: &mut S) -> Result<AuthMethod, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = Greeting::read_from(stream).await?;

    // Ensure version is 0x05 -> SOCKS5
    if greeting.version != Version::SOCKS5 as u8 {
        return Err(Socks5Error::UnsupportedVersion(greeting.version));
    }

    let method = select_auth_method(&greeting.methods);
    debug!("client offered {:?}, selected {:?}", greeting.methods, method);

    let selection = MethodSelection {
        method: method as u8,
    };
    stream.write_all(&selection.encode()).await?;
    stream.flush().await?;

    match method {
        AuthMethod::NoAcceptable => Err(Socks5Error::NoAcceptableMethod),
        _ => Ok(method),
    }
}

/// authenticate runs whatever the selected method requires after selection
pub async fn authenticate<S>(
    stream: &mut S,
    method: AuthMethod,
    validator: &dyn CredentialValidator,
) -> Result<AuthResult, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let identity = match method {
        AuthMethod::UserPass => Some(authenticate_userpass(stream, validator).await?),
        AuthMethod::NoAuth => None,
        _ => return Err(Socks5Error::NoAcceptableMethod),
    };

    Ok(AuthResult { method, identity })
}

/// authenticate_userpass handles username/password authentication according to the RFC1929
async fn authenticate_userpass<S>(
    stream: &mut S,
    validator: &dyn CredentialValidator,
) -> Result<String, Socks5Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = match UserPassRequest::read_from(stream).await {
        Ok(request) => request,
        Err(e @ Socks5Error::AuthVersionMismatch(_)) => {
            send_auth_reply(stream, AuthStatus::Failure).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let account = String::from_utf8_lossy(&request.username).into_owned();

    if !validator.validate(&request.username, &request.password) {
        send_auth_reply(stream, AuthStatus::Failure).await?;
        return Err(Socks5Error::AuthRejected(account));
    }

    send_auth_reply(stream, AuthStatus::Success).await?;
    debug!("authenticated account '{account}'");

    Ok(account)
}

async fn send_auth_reply<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: AuthStatus,
) -> Result<(), Socks5Error> {
    stream.write_all(&AuthReply { status }.encode()).await?;
    stream.flush().await?;
    Ok(())
}

/// select_auth_method takes the auth methods offered by the socks client
/// and returns the one to use. Username/password wins over no-auth
pub fn select_auth_method(client_methods: &[u8]) -> AuthMethod {
    // Preferred auth method order
    const PREFERRED_METHODS: &[AuthMethod] = &[AuthMethod::UserPass, AuthMethod::NoAuth];

    // Iterate through preferences in order. If there's a match
    // return it
    for &preferred in PREFERRED_METHODS {
        if client_methods.contains(&(preferred as u8)) {
            return preferred;
        }
    }

    AuthMethod::NoAcceptable
}

// Authentication module
// Credential loading, token persistence and the refresh-or-consent flow

mod callback;
mod credentials;
mod error;
mod exchange;
mod manager;
mod redirect;
mod token_store;
mod types;

pub use callback::CallbackExchanger;
pub use credentials::CredentialStore;
pub use error::{mask_token, AuthError, RefreshTokenError};
pub use exchange::TokenExchanger;
pub use manager::{AuthFlowController, ConsentTask, Initiation};
pub use redirect::{build_authorization_url, resolve_redirect_uri};
pub use token_store::TokenStore;
pub use types::{
    AuthOutcome, AuthSettings, CallbackOutcome, ClientCredentials, FlowState, RefreshOutcome,
    TokenRecord,
};

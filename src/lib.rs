pub mod browser;
pub mod config;
pub mod element;
pub mod error;
pub mod flow;
pub mod login;
pub mod page;
pub mod stealth;

pub use browser::LoginBrowser;
pub use config::{LoginBuilder, LoginConfig, ProxyConfig};
pub use element::Element;
pub use error::{Error, Result};
pub use flow::FlowConfig;
pub use login::{login, Credentials, LoginSession, Progress};
pub use page::Page;

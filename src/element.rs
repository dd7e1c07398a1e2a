use chromiumoxide::element::Element as CrElement;

use crate::error::{Error, Result};

/// Wrapper around a chromiumoxide Element, providing the handful of
/// interactions the login flow needs.
pub struct Element {
    inner: CrElement,
}

impl Element {
    pub(crate) fn new(inner: CrElement) -> Self {
        Self { inner }
    }

    /// Returns a reference to the underlying chromiumoxide Element.
    pub fn inner(&self) -> &CrElement {
        &self.inner
    }

    /// Click this element (scrolls into view first).
    pub async fn click(&self) -> Result<()> {
        self.inner.click().await.map_err(Error::CdpError)?;
        Ok(())
    }

    /// Type text into this element.
    pub async fn type_text(&self, text: &str) -> Result<()> {
        self.inner.type_str(text).await.map_err(Error::CdpError)?;
        Ok(())
    }

    /// Get the inner text of this element.
    pub async fn inner_text(&self) -> Result<String> {
        self.inner
            .inner_text()
            .await
            .map_err(Error::CdpError)?
            .ok_or_else(|| Error::ElementNotFound("inner text is empty".into()))
    }
}

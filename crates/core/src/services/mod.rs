pub mod clip;
pub mod converter;
pub mod generator;
pub mod ocr;

pub use clip::ClipEndpointScorer;
pub use converter::OfficeConverter;
pub use generator::ChatCompletionsGenerator;
pub use ocr::{NoOcr, TesseractOcr};

use reqwest::Client;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Every outbound HTTP call carries a deadline so a stalled backend surfaces
/// as an error on the file or query that issued it.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

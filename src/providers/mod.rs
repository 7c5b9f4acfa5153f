pub mod crypto;
pub mod equity;
pub mod fiat;
pub mod util;

pub use crypto::CryptoRates;
pub use equity::EquityRates;
pub use fiat::FiatRates;
pub use util::HttpSettings;

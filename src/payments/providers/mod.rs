pub mod balance;
pub mod crypto_usdt;
pub mod paypal;
pub mod payos;

pub use balance::BalanceAdapter;
pub use crypto_usdt::CryptoUsdtAdapter;
pub use paypal::PaypalAdapter;
pub use payos::PayosAdapter;

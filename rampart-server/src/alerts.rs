//! Low-balance alerts (§2 "Server glue"): a best-effort [`Messenger`] notification whenever an
//! exchange balance drops below the configured threshold. Never blocks or fails the caller, in
//! keeping with the Messenger contract's delivery guarantee.
use crate::state::AlertConfig;
use chrono::Utc;
use rampart_instrument::market::ExchangeId;
use rampart_integration::messenger::Messenger;
use rust_decimal::Decimal;

/// Sends a message through `messenger` if `balance` is below `config.low_balance_threshold`.
/// Returns whether an alert was sent, mainly so callers/tests can assert on it without a fake
/// messenger.
pub fn check_low_balance(messenger: &dyn Messenger, config: &AlertConfig, exchange: &ExchangeId, asset: &str, balance: Decimal) -> bool {
    if balance >= config.low_balance_threshold {
        return false;
    }
    messenger.send_message(
        Utc::now(),
        format!("{exchange}: {asset} balance {balance} below threshold {}", config.low_balance_threshold),
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rampart_integration::messenger::NullMessenger;
    use rust_decimal_macros::dec;

    #[test]
    fn fires_only_below_threshold() {
        let config = AlertConfig { low_balance_threshold: dec!(10) };
        let exchange = ExchangeId::new("binance");

        assert!(!check_low_balance(&NullMessenger, &config, &exchange, "USD", dec!(10)));
        assert!(check_low_balance(&NullMessenger, &config, &exchange, "USD", dec!(9.99)));
    }
}

//! Currency input view contract.
//!
//! A view is one side of the form: an amount field plus a currency selector.
//! It holds no state of its own; everything is derived from the controller,
//! and user input goes back through [`ConversionController::apply`].

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::debug;

use ratewise_common::CurrencyCode;

use crate::controller::ConversionController;
use crate::error::{ConvertError, ConvertResult};

/// Which half of the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    pub fn label(&self) -> &'static str {
        match self {
            Side::Source => "From",
            Side::Target => "To",
        }
    }
}

/// Everything a renderer needs for one side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyInputView {
    pub label: &'static str,
    pub amount: f64,
    /// Amount rounded for display.
    pub amount_text: String,
    /// Shared by both sides; always the source currency's table.
    pub currency_options: Vec<CurrencyCode>,
    pub selected: CurrencyCode,
    pub amount_disabled: bool,
    pub currency_disabled: bool,
}

/// Raw input from a view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputIntent {
    AmountChanged(String),
    CurrencyChanged(String),
}

/// Format `amount` with the currency's usual number of decimals.
pub fn format_amount(amount: f64, currency: &CurrencyCode) -> String {
    match Decimal::from_f64(amount) {
        Some(value) => value
            .round_dp_with_strategy(
                currency.decimal_places(),
                RoundingStrategy::MidpointAwayFromZero,
            )
            .normalize()
            .to_string(),
        None => amount.to_string(),
    }
}

/// Parse amount text the way a numeric form field does: blank is zero.
pub fn parse_amount(text: &str) -> ConvertResult<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0.0);
    }

    trimmed
        .parse::<f64>()
        .map_err(|_| ConvertError::InvalidAmount(trimmed.to_string()))
}

impl ConversionController {
    /// Build the view for one side.
    pub fn view(&self, side: Side) -> CurrencyInputView {
        let state = self.state();
        let (amount, selected) = match side {
            Side::Source => (state.amount_in, state.currency_from.clone()),
            Side::Target => (state.amount_out, state.currency_to.clone()),
        };

        CurrencyInputView {
            label: side.label(),
            amount,
            amount_text: format_amount(amount, &selected),
            currency_options: self.currency_options(),
            selected,
            amount_disabled: side == Side::Target,
            currency_disabled: false,
        }
    }

    /// Route a view's input to the matching event.
    pub fn apply(&mut self, side: Side, intent: InputIntent) -> ConvertResult<()> {
        match (side, intent) {
            (Side::Source, InputIntent::AmountChanged(text)) => {
                let amount = parse_amount(&text)?;
                self.set_amount_in(amount)
            }
            (Side::Target, InputIntent::AmountChanged(text)) => {
                debug!(text = %text, "Ignoring edit of read-only target amount");
                Ok(())
            }
            (Side::Source, InputIntent::CurrencyChanged(code)) => {
                self.set_currency_from(CurrencyCode::new(code)?);
                Ok(())
            }
            (Side::Target, InputIntent::CurrencyChanged(code)) => {
                self.set_currency_to(CurrencyCode::new(code)?);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RateTableCache;
    use crate::provider::MockRateProvider;
    use ratewise_common::RateTable;
    use std::sync::Arc;

    async fn settled_controller() -> ConversionController {
        let provider = Arc::new(MockRateProvider::new("test"));
        provider.set_rates(
            CurrencyCode::usd(),
            RateTable::from_pairs([
                (CurrencyCode::inr(), 83.1),
                (CurrencyCode::jpy(), 151.37),
                (CurrencyCode::eur(), 0.91),
            ])
            .unwrap(),
        );
        let cache = Arc::new(RateTableCache::new(provider));
        let mut controller =
            ConversionController::new(cache, CurrencyCode::usd(), CurrencyCode::inr());
        controller.settle().await;
        controller
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(831.0000000001, &CurrencyCode::inr()), "831");
        assert_eq!(format_amount(12.347, &CurrencyCode::usd()), "12.35");
        assert_eq!(format_amount(1513.7, &CurrencyCode::jpy()), "1514");
        assert_eq!(format_amount(0.0, &CurrencyCode::eur()), "0");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("").unwrap(), 0.0);
        assert_eq!(parse_amount("  12.5 ").unwrap(), 12.5);
        assert!(matches!(
            parse_amount("12,5"),
            Err(ConvertError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_views_share_source_options() {
        let mut controller = settled_controller().await;
        controller.set_amount_in(10.0).unwrap();

        let source = controller.view(Side::Source);
        let target = controller.view(Side::Target);

        assert_eq!(source.label, "From");
        assert_eq!(target.label, "To");
        assert_eq!(source.selected, CurrencyCode::usd());
        assert_eq!(target.selected, CurrencyCode::inr());
        assert_eq!(source.currency_options, target.currency_options);
        assert_eq!(
            source.currency_options,
            vec![CurrencyCode::inr(), CurrencyCode::jpy(), CurrencyCode::eur()]
        );
        assert!(!source.amount_disabled);
        assert!(target.amount_disabled);
        assert_eq!(target.amount_text, "831");
    }

    #[tokio::test]
    async fn test_apply_routes_intents() {
        let mut controller = settled_controller().await;

        controller
            .apply(Side::Source, InputIntent::AmountChanged("10".into()))
            .unwrap();
        controller
            .apply(Side::Target, InputIntent::CurrencyChanged("JPY".into()))
            .unwrap();

        assert_eq!(controller.state().currency_to, CurrencyCode::jpy());
        assert_eq!(controller.state().amount_out, 10.0 * 151.37);
        assert_eq!(controller.view(Side::Target).amount_text, "1514");
    }

    #[tokio::test]
    async fn test_apply_ignores_target_amount_edits() {
        let mut controller = settled_controller().await;
        controller.set_amount_in(1.0).unwrap();

        controller
            .apply(Side::Target, InputIntent::AmountChanged("999".into()))
            .unwrap();

        assert_eq!(controller.state().amount_in, 1.0);
        assert_eq!(controller.state().amount_out, 83.1);
    }

    #[tokio::test]
    async fn test_apply_rejects_bad_input() {
        let mut controller = settled_controller().await;

        assert!(controller
            .apply(Side::Source, InputIntent::AmountChanged("abc".into()))
            .is_err());
        assert!(matches!(
            controller.apply(Side::Source, InputIntent::CurrencyChanged("u$d".into())),
            Err(ConvertError::InvalidCurrency(_))
        ));
        assert_eq!(controller.state().currency_from, CurrencyCode::usd());
    }
}

use crate::error::{PipelineError, Result};
use crate::historical_dataset::OddsQuote;

/// Bookmaker-margin-free 1X2 probabilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpliedProbs {
    pub p_home: f64,
    pub p_draw: f64,
    pub p_away: f64,
    pub overround: f64,
}

pub fn normalize(quote: &OddsQuote) -> Result<ImpliedProbs> {
    normalize_prices(quote.home_price, quote.draw_price, quote.away_price)
}

pub fn normalize_prices(home: f64, draw: f64, away: f64) -> Result<ImpliedProbs> {
    for (side, price) in [("home", home), ("draw", draw), ("away", away)] {
        if !price.is_finite() || price <= 0.0 {
            return Err(PipelineError::InvalidOdds(format!(
                "{side} price {price} is not a positive finite number"
            )));
        }
    }

    let inv_home = 1.0 / home;
    let inv_draw = 1.0 / draw;
    let inv_away = 1.0 / away;
    let total = inv_home + inv_draw + inv_away;
    Ok(ImpliedProbs {
        p_home: inv_home / total,
        p_draw: inv_draw / total,
        p_away: inv_away / total,
        overround: total - 1.0,
    })
}

#[cfg(test)]
mod tests {
    use super::{normalize, normalize_prices};
    use crate::error::PipelineError;
    use crate::historical_dataset::{Bookmaker, OddsQuote};

    #[test]
    fn reference_prices_normalize() {
        let p = normalize(&OddsQuote {
            bookmaker: Bookmaker::Bet365,
            home_price: 2.0,
            draw_price: 3.0,
            away_price: 4.0,
        })
        .unwrap();
        assert!((p.p_home - 0.4615).abs() < 1e-4);
        assert!((p.p_draw - 0.3077).abs() < 1e-4);
        assert!((p.p_away - 0.2308).abs() < 1e-4);
        assert!((p.p_home + p.p_draw + p.p_away - 1.0).abs() < 1e-9);
        assert!(p.overround > 0.0);
    }

    #[test]
    fn non_positive_or_non_finite_prices_fail() {
        for bad in [0.0, -1.5, f64::NAN, f64::INFINITY] {
            let err = normalize_prices(2.0, bad, 4.0).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidOdds(_)));
        }
    }
}

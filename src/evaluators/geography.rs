//! GEOGRAPHY: billing country and client address plausibility

use super::{no_data, EvaluationInputs, RiskEvaluator};
use crate::config::GeographyConfig;
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use std::net::IpAddr;

const BASE_SCORE: f64 = 10.0;
const NON_ROUTABLE_PENALTY: f64 = 20.0;
const NEW_COUNTRY_PENALTY: f64 = 35.0;
const HIGH_RISK_PENALTY: f64 = 50.0;

pub struct GeographyEvaluator {
    config: GeographyConfig,
}

impl GeographyEvaluator {
    pub fn new(config: GeographyConfig) -> Self {
        Self { config }
    }
}

/// Addresses an end customer's request should never arrive from
fn non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_link_local()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

impl RiskEvaluator for GeographyEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::Geography
    }

    fn evaluate(
        &self,
        ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        let country = ctx.billing_country();
        let ip = ctx.ip();
        let malformed_ip = ip.is_none() && !ctx.ip_address.trim().is_empty();

        if country.is_none() && ip.is_none() && !malformed_ip {
            return Ok(no_data(
                RiskFactorType::Geography,
                weight,
                "No billing country or client address",
            ));
        }

        let mut score = BASE_SCORE;
        let mut reasons = Vec::new();

        if let Some(ip) = ip.filter(|ip| non_routable(*ip)) {
            score += NON_ROUTABLE_PENALTY;
            reasons.push(format!("non-routable client address {ip}"));
        }
        if malformed_ip {
            score += NON_ROUTABLE_PENALTY;
            reasons.push("unparsable client address".to_string());
        }

        if let Some(country) = &country {
            if self.config.is_high_risk(country) {
                score += HIGH_RISK_PENALTY;
                reasons.push(format!("high-risk country {country}"));
            }
            let known = inputs.history.map(|h| &h.known_countries);
            if let Some(known) = known.filter(|k| !k.is_empty()) {
                if !known.contains(country) {
                    score += NEW_COUNTRY_PENALTY;
                    reasons.push(format!("first transaction billed to {country}"));
                }
            }
        }

        let description = if reasons.is_empty() {
            match &country {
                Some(country) => format!("Billing country {country} consistent with history"),
                None => "Client address looks ordinary".to_string(),
            }
        } else {
            reasons.join("; ")
        };

        Ok(RiskFactor::new(RiskFactorType::Geography, score, weight, description))
    }
}

//! DEVICE: trust of the device the transaction came from

use super::{no_data, EvaluationInputs, RiskEvaluator};
use crate::config::DeviceConfig;
use crate::types::device::RiskIndicator;
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::transaction::TransactionContext;
use anyhow::Result;

pub struct DeviceEvaluator {
    config: DeviceConfig,
}

impl DeviceEvaluator {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }
}

impl RiskEvaluator for DeviceEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::Device
    }

    fn evaluate(
        &self,
        _ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        let device = match inputs.device {
            Some(device) => device,
            None => return Ok(no_data(RiskFactorType::Device, weight, "No device data supplied")),
        };

        let mut score = (1.0 - device.trust_score) * 100.0;
        if inputs.device_observation.is_none() {
            score += self.config.unseen_penalty;
        }
        if device.has_indicator(RiskIndicator::PreviouslyFlagged) {
            score += self.config.flagged_penalty;
        }

        let description = if device.risk_indicators.is_empty() {
            format!("Known device, trust {:.2}", device.trust_score)
        } else {
            let indicators: Vec<String> = device
                .risk_indicators
                .iter()
                .map(|i| format!("{i:?}"))
                .collect();
            format!("Device trust {:.2} ({})", device.trust_score, indicators.join(", "))
        };

        Ok(RiskFactor::new(RiskFactorType::Device, score, weight, description))
    }
}

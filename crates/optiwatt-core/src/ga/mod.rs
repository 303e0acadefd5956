// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

pub mod engine;
pub mod population;

pub use engine::{
    BestCandidate, CancelToken, GaEngine, OptimizationOutcome, RunMetrics, Termination,
};
pub use population::Population;

use optiwatt_types::series::SLOTS_PER_DAY;

use crate::sim::SimulationInput;

/// Overwrite candidate 0 with a rule-based heuristic schedule
///
/// Devices run when PV is high and the price is below the daily average;
/// the battery charges from PV surplus and discharges into deficits. One
/// sane starting point speeds up convergence on easy days.
pub fn rule_based_candidate(
    input: &SimulationInput<'_>,
    masks: &[Vec<bool>],
    population: &mut Population,
) {
    if population.is_empty() {
        return;
    }
    let mean_price = input.price.mean();

    for (dev, mask) in masks.iter().enumerate().take(population.device_count()) {
        let row = population.device_row_mut(0, dev);
        for t in 0..SLOTS_PER_DAY {
            let favourable =
                input.pv.kw[t] > 0.5 && input.price.eur_per_kwh[t] < mean_price && mask[t];
            row[t] = if favourable { 1.0 } else { 0.0 };
        }
    }

    let battery = input.battery;
    let row = population.battery_row_mut(0);
    for t in 0..SLOTS_PER_DAY {
        let surplus = input.pv.kw[t] - input.load.kw[t];
        row[t] = surplus.clamp(-battery.max_discharge_kw, battery.max_charge_kw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatt_types::config::FitnessWeights;
    use optiwatt_types::device::BatterySpec;
    use optiwatt_types::series::{LoadForecast, PriceSeries, PvForecast};

    #[test]
    fn test_rule_based_candidate_charges_from_surplus() {
        let mut pv_kw = vec![0.0; SLOTS_PER_DAY];
        pv_kw[48] = 3.0;
        let pv = PvForecast::from_kw(pv_kw);
        let load = LoadForecast::uniform(0.5);
        let price = PriceSeries::uniform(0.2);
        let battery = BatterySpec::default();
        let input = SimulationInput {
            pv: &pv,
            load: &load,
            price: &price,
            battery: &battery,
            devices: &[],
            weights: FitnessWeights::default(),
            export_price_eur_per_kwh: 0.0,
            initial_soc: 0.5,
        };

        let mut population = Population::zeroed(4, 0);
        rule_based_candidate(&input, &[], &mut population);

        let row = population.battery_row(0);
        assert_eq!(row[48], 2.0); // surplus clamped to max charge rate
        assert_eq!(row[0], -0.5); // deficit discharges
    }
}

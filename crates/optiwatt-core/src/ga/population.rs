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

use rand::Rng;

use optiwatt_types::device::{BatterySpec, DeviceControl, DeviceSpec};
use optiwatt_types::series::SLOTS_PER_DAY;

/// Struct-of-arrays candidate population
///
/// Genes live in two contiguous buffers so evaluation walks memory
/// linearly: device genes as `n * d` rows of 96, battery genes as `n`
/// rows of 96. The population size is fixed for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Population {
    n: usize,
    d: usize,
    pub device_genes: Vec<f64>,
    pub battery_genes: Vec<f64>,
    pub fitness: Vec<f64>,
}

impl Population {
    /// Random initial population
    ///
    /// Binary device genes are Bernoulli(0.5), fractional genes uniform in
    /// [0,1], both hard-masked by the device window. Battery genes are
    /// uniform in [-max_discharge, +max_charge].
    pub fn random(
        n: usize,
        devices: &[DeviceSpec],
        masks: &[Vec<bool>],
        battery: &BatterySpec,
        rng: &mut impl Rng,
    ) -> Self {
        let d = devices.len();
        let mut population = Self::zeroed(n, d);

        for i in 0..n {
            for (dev, spec) in devices.iter().enumerate() {
                let row = population.device_row_mut(i, dev);
                for (t, gene) in row.iter_mut().enumerate() {
                    if !masks[dev][t] {
                        continue;
                    }
                    *gene = match spec.control {
                        DeviceControl::Binary => {
                            if rng.gen_bool(0.5) {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        DeviceControl::Fractional => rng.gen_range(0.0..=1.0),
                    };
                }
            }
            let row = population.battery_row_mut(i);
            if battery.max_charge_kw > 0.0 || battery.max_discharge_kw > 0.0 {
                for gene in row.iter_mut() {
                    *gene = rng.gen_range(-battery.max_discharge_kw..=battery.max_charge_kw);
                }
            }
        }
        population
    }

    /// Same layout, all genes zero; used as the write target of a generation
    pub fn zeroed(n: usize, d: usize) -> Self {
        Self {
            n,
            d,
            device_genes: vec![0.0; n * d * SLOTS_PER_DAY],
            battery_genes: vec![0.0; n * SLOTS_PER_DAY],
            fitness: vec![f64::NEG_INFINITY; n],
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn device_count(&self) -> usize {
        self.d
    }

    /// All device genes of candidate `i` (d rows of 96, row-major)
    pub fn candidate_devices(&self, i: usize) -> &[f64] {
        let stride = self.d * SLOTS_PER_DAY;
        &self.device_genes[i * stride..(i + 1) * stride]
    }

    pub fn candidate_devices_mut(&mut self, i: usize) -> &mut [f64] {
        let stride = self.d * SLOTS_PER_DAY;
        &mut self.device_genes[i * stride..(i + 1) * stride]
    }

    pub fn device_row(&self, i: usize, dev: usize) -> &[f64] {
        let start = (i * self.d + dev) * SLOTS_PER_DAY;
        &self.device_genes[start..start + SLOTS_PER_DAY]
    }

    pub fn device_row_mut(&mut self, i: usize, dev: usize) -> &mut [f64] {
        let start = (i * self.d + dev) * SLOTS_PER_DAY;
        &mut self.device_genes[start..start + SLOTS_PER_DAY]
    }

    pub fn battery_row(&self, i: usize) -> &[f64] {
        &self.battery_genes[i * SLOTS_PER_DAY..(i + 1) * SLOTS_PER_DAY]
    }

    pub fn battery_row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.battery_genes[i * SLOTS_PER_DAY..(i + 1) * SLOTS_PER_DAY]
    }

    /// Copy candidate `from` of `source` into slot `to` of `self`
    pub fn copy_from(&mut self, source: &Population, from: usize, to: usize) {
        let stride = self.d * SLOTS_PER_DAY;
        self.device_genes[to * stride..(to + 1) * stride]
            .copy_from_slice(&source.device_genes[from * stride..(from + 1) * stride]);
        self.battery_genes[to * SLOTS_PER_DAY..(to + 1) * SLOTS_PER_DAY]
            .copy_from_slice(source.battery_row(from));
        self.fitness[to] = source.fitness[from];
    }

    /// Write a crossover child of two parents into slot `to`
    ///
    /// The split point applies identically to every device row and to the
    /// battery row to preserve temporal coherence across the candidate.
    pub fn write_crossover(
        &mut self,
        source: &Population,
        parent_a: usize,
        parent_b: usize,
        point: usize,
        to: usize,
    ) {
        for dev in 0..self.d {
            let a = source.device_row(parent_a, dev);
            let b = source.device_row(parent_b, dev);
            let child = self.device_row_mut(to, dev);
            child[..point].copy_from_slice(&a[..point]);
            child[point..].copy_from_slice(&b[point..]);
        }
        let a = source.battery_row(parent_a);
        let b = source.battery_row(parent_b);
        let child = self.battery_row_mut(to);
        child[..point].copy_from_slice(&a[..point]);
        child[point..].copy_from_slice(&b[point..]);
        self.fitness[to] = f64::NEG_INFINITY;
    }

    /// Extract candidate `i` as owned per-device rows + battery row
    pub fn extract(&self, i: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let rows = (0..self.d).map(|dev| self.device_row(i, dev).to_vec()).collect();
        (rows, self.battery_row(i).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn specs() -> Vec<DeviceSpec> {
        vec![
            DeviceSpec {
                id: "a".to_string(),
                power_kw: 1.0,
                priority: 0.5,
                control: DeviceControl::Binary,
                window: None,
            },
            DeviceSpec {
                id: "b".to_string(),
                power_kw: 0.5,
                priority: 0.5,
                control: DeviceControl::Fractional,
                window: None,
            },
        ]
    }

    #[test]
    fn test_random_population_respects_gene_domains() {
        let devices = specs();
        let masks: Vec<Vec<bool>> = devices.iter().map(|d| d.slot_mask()).collect();
        let battery = BatterySpec::default();
        let mut rng = StdRng::seed_from_u64(1);

        let population = Population::random(20, &devices, &masks, &battery, &mut rng);

        for i in 0..20 {
            for gene in population.device_row(i, 0) {
                assert!(*gene == 0.0 || *gene == 1.0);
            }
            for gene in population.device_row(i, 1) {
                assert!((0.0..=1.0).contains(gene));
            }
            for gene in population.battery_row(i) {
                assert!((-battery.max_discharge_kw..=battery.max_charge_kw).contains(gene));
            }
        }
    }

    #[test]
    fn test_masked_slots_stay_zero() {
        let mut devices = specs();
        devices[0].window = Some(optiwatt_types::device::DeviceWindow {
            earliest_hour: 10,
            latest_hour: 12,
            min_runtime_slots: 1,
            required_energy_kwh: 0.0,
        });
        let masks: Vec<Vec<bool>> = devices.iter().map(|d| d.slot_mask()).collect();
        let mut rng = StdRng::seed_from_u64(2);

        let population = Population::random(10, &devices, &masks, &BatterySpec::default(), &mut rng);

        for i in 0..10 {
            let row = population.device_row(i, 0);
            for (t, gene) in row.iter().enumerate() {
                if !masks[0][t] {
                    assert_eq!(*gene, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_crossover_applies_same_point_to_all_rows() {
        let devices = specs();
        let masks: Vec<Vec<bool>> = devices.iter().map(|d| d.slot_mask()).collect();
        let mut rng = StdRng::seed_from_u64(3);
        let source = Population::random(2, &devices, &masks, &BatterySpec::default(), &mut rng);

        let mut child = Population::zeroed(1, 2);
        child.write_crossover(&source, 0, 1, 48, 0);

        assert_eq!(&child.device_row(0, 0)[..48], &source.device_row(0, 0)[..48]);
        assert_eq!(&child.device_row(0, 0)[48..], &source.device_row(1, 0)[48..]);
        assert_eq!(&child.battery_row(0)[..48], &source.battery_row(0)[..48]);
        assert_eq!(&child.battery_row(0)[48..], &source.battery_row(1)[48..]);
    }

    #[test]
    fn test_copy_preserves_fitness() {
        let devices = specs();
        let masks: Vec<Vec<bool>> = devices.iter().map(|d| d.slot_mask()).collect();
        let mut rng = StdRng::seed_from_u64(4);
        let mut source = Population::random(2, &devices, &masks, &BatterySpec::default(), &mut rng);
        source.fitness[1] = -3.25;

        let mut target = Population::zeroed(2, 2);
        target.copy_from(&source, 1, 0);
        assert_eq!(target.fitness[0], -3.25);
        assert_eq!(target.candidate_devices(0), source.candidate_devices(1));
    }
}

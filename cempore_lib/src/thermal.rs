//! Mapping of discrete cycles to physical time and temperature evolution.
//!
//! The parabolic map assigns cycle `n` the time `beta * n^2` at the reference
//! temperature. Away from the reference the increment is scaled by the
//! Arrhenius rate factor: a hotter system does the same chemistry in less
//! wall-clock time. Dissolution probabilities of phases whose activation
//! energy differs from the binder value are additionally scaled by the
//! engine through [`relative_rate_factor`].

use log::debug;

/// Universal gas constant, J/(mol K).
const GAS_CONSTANT: f64 = 8.314;

/// Thermal regime of the simulated specimen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThermalMode {
    /// Hold the temperature at its initial value
    Isothermal,
    /// No exchange with the surroundings
    Adiabatic,
    /// First-order exchange with the ambient profile;
    /// `transfer_coefficient` in J/(g K h)
    SemiAdiabatic { transfer_coefficient: f64 },
}

/// Piecewise-linear ambient temperature profile.
#[derive(Clone, Debug)]
pub struct AmbientProfile {
    /// `(time in h, temperature in °C)`, sorted by time
    points: Vec<(f64, f64)>,
}

impl AmbientProfile {
    pub fn constant(temperature: f64) -> Self {
        Self {
            points: vec![(0.0, temperature)],
        }
    }

    pub fn from_points(mut points: Vec<(f64, f64)>) -> Self {
        assert!(!points.is_empty());
        points.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        Self { points }
    }

    /// Ambient temperature at the given time, clamped at the table ends.
    pub fn at(&self, time: f64) -> f64 {
        let first = self.points[0];
        if time <= first.0 {
            return first.1;
        }
        for window in self.points.windows(2) {
            let (t0, v0) = window[0];
            let (t1, v1) = window[1];
            if time <= t1 {
                return v0 + (v1 - v0) * (time - t0) / (t1 - t0);
            }
        }
        self.points.last().unwrap().1
    }
}

/// Settings of the cycle-to-time map and heat balance.
#[derive(Clone, Debug)]
pub struct ThermalSettings {
    pub mode: ThermalMode,
    /// Time assigned to cycle n is `beta * n^2` hours at the reference
    /// temperature
    pub beta: f64,
    /// Apparent activation energy of the binder, kJ/mol
    pub activation_energy: f64,
    /// Reference temperature of the parabolic calibration, °C
    pub reference_temp: f64,
    /// Temperature at cycle zero, °C
    pub initial_temp: f64,
    /// Specific heat of the specimen, J/(g K)
    pub heat_capacity: f64,
    pub ambient: AmbientProfile,
}

impl Default for ThermalSettings {
    fn default() -> Self {
        Self {
            mode: ThermalMode::Isothermal,
            beta: 0.00035,
            activation_energy: 40.0,
            reference_temp: 25.0,
            initial_temp: 25.0,
            heat_capacity: 1.55,
            ambient: AmbientProfile::constant(25.0),
        }
    }
}

/// Arrhenius rate factor of a reaction with activation energy `ea` (kJ/mol)
/// at `temp` relative to `reference` (both °C). Greater than one when hotter.
pub fn rate_factor(ea: f64, temp: f64, reference: f64) -> f64 {
    let t = temp + 273.15;
    let t_ref = reference + 273.15;
    (-(ea * 1000.0 / GAS_CONSTANT) * (1.0 / t - 1.0 / t_ref)).exp()
}

/// Rate factor of a phase with activation energy `ea` relative to the binder
/// value the time map is calibrated with. One when the energies agree.
pub fn relative_rate_factor(ea: f64, binder_ea: f64, temp: f64, reference: f64) -> f64 {
    rate_factor(ea - binder_ea, temp, reference)
}

/// Maps cycles to physical time and integrates the specimen heat balance.
#[derive(Clone, Debug)]
pub struct TimeTemperatureMapper {
    settings: ThermalSettings,
    time: f64,
    temperature: f64,
}

impl TimeTemperatureMapper {
    pub fn new(settings: ThermalSettings) -> Self {
        let temperature = settings.initial_temp;
        Self {
            settings,
            time: 0.0,
            temperature,
        }
    }

    /// Elapsed physical time in hours.
    pub fn time_hours(&self) -> f64 {
        self.time
    }

    /// Current specimen temperature in °C.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn settings(&self) -> &ThermalSettings {
        &self.settings
    }

    /// Advances the clock across cycle `n` (1-based) with `heat` J released
    /// per gram of specimen during the cycle; returns the time increment in
    /// hours.
    pub fn advance(&mut self, cycle: u32, heat: f64) -> f64 {
        let n = cycle as f64;
        let krate = rate_factor(
            self.settings.activation_energy,
            self.temperature,
            self.settings.reference_temp,
        );
        let dt = self.settings.beta * (2.0 * n - 1.0) / krate;
        self.time += dt;

        match self.settings.mode {
            ThermalMode::Isothermal => {}
            ThermalMode::Adiabatic => {
                self.temperature += heat / self.settings.heat_capacity;
            }
            ThermalMode::SemiAdiabatic {
                transfer_coefficient,
            } => {
                let ambient = self.settings.ambient.at(self.time);
                let loss = transfer_coefficient * (self.temperature - ambient) * dt;
                self.temperature += (heat - loss) / self.settings.heat_capacity;
            }
        }
        debug!(
            "cycle {cycle}: dt {dt:.5} h, t {:.2} h, T {:.2} C",
            self.time, self.temperature
        );
        dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parabolic_time_at_reference_temperature() {
        let mut mapper = TimeTemperatureMapper::new(ThermalSettings::default());
        for cycle in 1..=100 {
            mapper.advance(cycle, 0.0);
        }
        // Sum of beta * (2n - 1) telescopes to beta * n^2
        let expected = 0.00035 * 100.0 * 100.0;
        assert!((mapper.time_hours() - expected).abs() < 1e-9);
        assert_eq!(mapper.temperature(), 25.0);
    }

    #[test]
    fn hotter_specimen_advances_less_time_per_cycle() {
        let settings = ThermalSettings {
            initial_temp: 45.0,
            ..Default::default()
        };
        let mut hot = TimeTemperatureMapper::new(settings);
        let mut reference = TimeTemperatureMapper::new(ThermalSettings::default());
        let dt_hot = hot.advance(10, 0.0);
        let dt_ref = reference.advance(10, 0.0);
        assert!(dt_hot < dt_ref);
    }

    #[test]
    fn adiabatic_heating_is_monotone() {
        let settings = ThermalSettings {
            mode: ThermalMode::Adiabatic,
            ..Default::default()
        };
        let mut mapper = TimeTemperatureMapper::new(settings);
        let mut last = mapper.temperature();
        for cycle in 1..=50 {
            mapper.advance(cycle, 0.8);
            assert!(mapper.temperature() >= last);
            last = mapper.temperature();
        }
        assert!((mapper.temperature() - (25.0 + 50.0 * 0.8 / 1.55)).abs() < 1e-9);
    }

    #[test]
    fn semi_adiabatic_relaxes_towards_ambient() {
        let settings = ThermalSettings {
            mode: ThermalMode::SemiAdiabatic {
                transfer_coefficient: 2.0,
            },
            initial_temp: 60.0,
            ambient: AmbientProfile::constant(20.0),
            ..Default::default()
        };
        let mut mapper = TimeTemperatureMapper::new(settings);
        for cycle in 1..=400 {
            mapper.advance(cycle, 0.0);
        }
        assert!(mapper.temperature() < 60.0);
        assert!(mapper.temperature() >= 20.0 - 1e-6);
    }

    #[test]
    fn ambient_profile_interpolates_and_clamps() {
        let profile = AmbientProfile::from_points(vec![(0.0, 20.0), (10.0, 30.0)]);
        assert_eq!(profile.at(-1.0), 20.0);
        assert!((profile.at(5.0) - 25.0).abs() < 1e-12);
        assert_eq!(profile.at(100.0), 30.0);
    }

    #[test]
    fn rate_factor_direction() {
        assert!(rate_factor(40.0, 35.0, 25.0) > 1.0);
        assert!(rate_factor(40.0, 15.0, 25.0) < 1.0);
        assert!((rate_factor(40.0, 25.0, 25.0) - 1.0).abs() < 1e-12);
        // Relative factor is neutral for the binder itself
        assert!((relative_rate_factor(40.0, 40.0, 50.0, 25.0) - 1.0).abs() < 1e-12);
        // Pozzolanic reactions speed up more than clinker when heated
        assert!(relative_rate_factor(83.1, 40.0, 50.0, 25.0) > 1.0);
    }
}

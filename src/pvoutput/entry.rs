use crate::prelude::*;

/// Power below this is treated as zero when judging CT orientation.
pub const ZERO_TOL: f64 = 1.0;

/// One measurement bound for the remote. Internal sign convention:
/// generation and export are negative, consumption and import positive.
/// The encoder converts to the remote's positive-only form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entry {
    pub unix_time: i64,
    pub voltage: f64,
    pub energy_generated: f64,
    pub power_generated: f64,
    pub energy_consumed: f64,
    pub power_consumed: f64,
}

/// Learned CT orientation. A coil installed backwards flips the sign of
/// everything it measures; once detected the flag stays set and later
/// calculations pre-correct.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReversedFlags {
    pub mains: bool,
    pub solar: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelConfig {
    pub mains: i32,
    pub solar: i32,
    pub voltage: i32,
}

impl ChannelConfig {
    /// The voltage reference comes from the mains channel's configured
    /// voltage input, falling back to the solar channel's.
    pub fn resolve(inputs: &[config::InputChannel], mains: i32, solar: i32) -> Self {
        let voltage_of = |channel: i32| -> i32 {
            if channel >= 0 {
                inputs.get(channel as usize).map_or(-1, |c| c.voltage_channel())
            } else {
                -1
            }
        };
        let voltage = if mains >= 0 { voltage_of(mains) } else { voltage_of(solar) };
        Self { mains, solar, voltage }
    }
}

/// Build the entry for `post_time` from the three reference records,
/// learning CT orientation along the way.
pub fn calculate(
    post_time: i64,
    prev: &LogRecord,
    next: &LogRecord,
    day_start: &LogRecord,
    channels: ChannelConfig,
    flags: &mut ReversedFlags,
) -> Entry {
    let log_hours = next.log_hours - prev.log_hours;

    let mut voltage = 0.0;
    if log_hours != 0.0 && channels.voltage >= 0 {
        voltage = (next.accum1(channels.voltage) - prev.accum1(channels.voltage)) / log_hours;
    }

    // Energies accumulate since the start of the local day.
    let mut energy_generated = next.accum1(channels.solar) - day_start.accum1(channels.solar);
    let mut energy_imported = next.accum1(channels.mains) - day_start.accum1(channels.mains);

    // Mean power over the period since the previous post.
    let mut power_generated = 0.0;
    let mut power_imported = 0.0;
    if log_hours != 0.0 {
        if channels.solar >= 0 {
            power_generated = (next.accum1(channels.solar) - prev.accum1(channels.solar)) / log_hours;
        }
        if channels.mains >= 0 {
            power_imported = (next.accum1(channels.mains) - prev.accum1(channels.mains)) / log_hours;
        }
    }

    // Apply the orientation learned on earlier periods.
    if flags.solar {
        energy_generated = -energy_generated;
        power_generated = -power_generated;
    }
    if flags.mains {
        energy_imported = -energy_imported;
        power_imported = -power_imported;
    }

    // A solar channel only ever generates; sustained positive power means
    // the coil is backwards.
    if power_generated > ZERO_TOL {
        warn!(
            "solar channel appears reversed (power {:.1} W), inverting from now on",
            power_generated
        );
        energy_generated = -energy_generated;
        power_generated = -power_generated;
        flags.solar = !flags.solar;
    }

    // Exporting more than we generate is impossible; the mains coil must
    // be backwards.
    if power_imported + ZERO_TOL < power_generated - ZERO_TOL {
        warn!(
            "mains channel appears reversed (import {:.1} W < generation {:.1} W), inverting from now on",
            power_imported, power_generated
        );
        energy_imported = -energy_imported;
        power_imported = -power_imported;
        flags.mains = !flags.mains;
    }

    // generated = -5 kWh and imported = 2 kWh means 7 kWh consumed.
    Entry {
        unix_time: post_time,
        voltage,
        energy_generated,
        power_generated,
        energy_consumed: energy_imported - energy_generated,
        power_consumed: power_imported - power_generated,
    }
}

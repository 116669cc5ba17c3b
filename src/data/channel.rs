//! The measured channels of the rig.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One physical measurement published every acquisition tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Hydraulic power unit supply pressure
    HpuPressure,
    /// Drill motor pressure
    DrillPressure,
    /// Screwjack motor pressure
    ScrewjackPressure,
    /// Drill shaft speed
    DrillSpeed,
    /// Screwjack travel
    ScrewjackPosition,
    /// Screwjack feed rate
    ScrewjackSpeed,
    /// Front bearing temperature
    FrontBearingTemp,
    /// Rear bearing temperature
    RearBearingTemp,
    /// Drill torque
    Torque,
    /// Drill thrust force
    Force,
}

impl Channel {
    /// Number of channels.
    pub const COUNT: usize = 10;

    /// All channels in publish order.
    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::HpuPressure,
        Channel::DrillPressure,
        Channel::ScrewjackPressure,
        Channel::DrillSpeed,
        Channel::ScrewjackPosition,
        Channel::ScrewjackSpeed,
        Channel::FrontBearingTemp,
        Channel::RearBearingTemp,
        Channel::Torque,
        Channel::Force,
    ];

    /// Position of this channel in [`Channel::ALL`] and in snapshot arrays.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Physical quantity, the third segment of the store key.
    pub const fn quantity(self) -> &'static str {
        match self {
            Channel::HpuPressure | Channel::DrillPressure | Channel::ScrewjackPressure => {
                "pressure"
            }
            Channel::DrillSpeed => "rotary_speed",
            Channel::ScrewjackPosition => "position",
            Channel::ScrewjackSpeed => "linear_speed",
            Channel::FrontBearingTemp | Channel::RearBearingTemp => "temperature",
            Channel::Torque => "torque",
            Channel::Force => "force",
        }
    }

    /// Where on the rig, the last segment of the store key.
    pub const fn location(self) -> &'static str {
        match self {
            Channel::HpuPressure => "hpu",
            Channel::DrillPressure
            | Channel::DrillSpeed
            | Channel::Torque
            | Channel::Force => "drill",
            Channel::ScrewjackPressure | Channel::ScrewjackPosition | Channel::ScrewjackSpeed => {
                "screwjack"
            }
            Channel::FrontBearingTemp => "front_bearing",
            Channel::RearBearingTemp => "rear_bearing",
        }
    }

    /// Engineering unit of the calibrated value.
    pub const fn unit(self) -> &'static str {
        match self {
            Channel::HpuPressure | Channel::DrillPressure | Channel::ScrewjackPressure => "bar",
            Channel::DrillSpeed => "RPM",
            Channel::ScrewjackPosition => "cm",
            Channel::ScrewjackSpeed => "cm/min",
            Channel::FrontBearingTemp | Channel::RearBearingTemp => "deg C",
            Channel::Torque => "Nm",
            Channel::Force => "N",
        }
    }

    /// Column name used by the session logger.
    pub const fn log_name(self) -> &'static str {
        match self {
            Channel::HpuPressure => "hpu_pressure",
            Channel::DrillPressure => "drill_pressure",
            Channel::ScrewjackPressure => "screwjack_pressure",
            Channel::DrillSpeed => "drill_speed",
            Channel::ScrewjackPosition => "screwjack_position",
            Channel::ScrewjackSpeed => "screwjack_speed",
            Channel::FrontBearingTemp => "front_temp",
            Channel::RearBearingTemp => "rear_temp",
            Channel::Torque => "torque",
            Channel::Force => "force",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.log_name())
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] ConfigError),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        field,
        reason: reason.into(),
    }
}

pub(crate) fn secs(value: f32) -> Duration {
    Duration::try_from_secs_f32(value.max(0.0)).unwrap_or(Duration::ZERO)
}

/// All tunables of a match. Every peer must run with the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub track: TrackSettings,
    pub adherence: AdherenceSettings,
    pub motion: MotionSettings,
    pub items: ItemSettings,
    pub rules: RuleSettings,
    pub net: NetSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackSettings {
    pub progress_samples: usize,
    pub road_width: f32,
    /// Rows of pickups laid out along the track.
    pub pickup_rows: usize,
    pub obstacle_count: usize,
    pub obstacle_radius: f32,
    pub vehicle_radius: f32,
    /// Lateral spacing of starting lanes as a fraction of road width.
    pub lane_spacing: f32,
    /// Height of the starting grid above the curve as a fraction of road width.
    pub spawn_lift: f32,
}

impl Default for TrackSettings {
    fn default() -> Self {
        Self {
            progress_samples: 300,
            road_width: 0.6,
            pickup_rows: 8,
            obstacle_count: 6,
            obstacle_radius: 0.05,
            vehicle_radius: 0.05,
            lane_spacing: 0.2,
            spawn_lift: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdherenceSettings {
    pub off_track_distance: f32,
    pub off_track_height: f32,
    /// Vertical deviation beyond `off_track_height * freeze_factor` freezes
    /// the vehicle in place until it is respawned.
    pub freeze_factor: f32,
    pub respawn_cooldown: f32,
    pub respawn_lift: f32,
    pub flip_angle_degrees: f32,
    pub flip_respawn_time: f32,
}

impl Default for AdherenceSettings {
    fn default() -> Self {
        Self {
            off_track_distance: 2.0,
            off_track_height: 0.5,
            freeze_factor: 1.5,
            respawn_cooldown: 2.0,
            respawn_lift: 0.1,
            flip_angle_degrees: 70.0,
            flip_respawn_time: 2.0,
        }
    }
}

impl AdherenceSettings {
    pub fn respawn_cooldown(&self) -> Duration {
        secs(self.respawn_cooldown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub base_speed: f32,
    pub turn_rate: f32,
    pub slope_assist: bool,
    pub slope_min_degrees: f32,
    pub slope_multiplier: f32,
    pub slope_max_force: f32,
    pub probe_height: f32,
    pub probe_distance: f32,
    /// Exponential decay rate of knock-back velocity while control is locked.
    pub knockback_damping: f32,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            base_speed: 0.3,
            turn_rate: 1.5,
            slope_assist: true,
            slope_min_degrees: 5.0,
            slope_multiplier: 2.0,
            slope_max_force: 1.0,
            probe_height: 0.5,
            probe_distance: 2.0,
            knockback_damping: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemSettings {
    /// Exclusive upper bounds of a 0..100 roll for red oil, green oil, bomb,
    /// crown, booster, gold and hook, in that order.
    pub cut_points: Vec<u32>,
    pub red_oil_factor: f32,
    pub green_oil_factor: f32,
    pub boost_factor: f32,
    pub boost_duration: f32,
    pub invincibility_duration: f32,
    pub display_duration: f32,
    pub pickup_radius: f32,
    pub pickup_respawn_delay: f32,
    pub bomb_speed: f32,
    pub bomb_trigger_distance: f32,
    pub bomb_timeout: f32,
    pub blast_radius: f32,
    pub hit_impulse: f32,
    pub hit_spin: f32,
    pub hit_lock: f32,
    pub hook_offset: f32,
    pub hook_duration: f32,
    pub gold_to_win: u32,
}

impl Default for ItemSettings {
    fn default() -> Self {
        Self {
            cut_points: vec![15, 30, 50, 70, 80, 95, 100],
            red_oil_factor: 0.9,
            green_oil_factor: 1.1,
            boost_factor: 2.0,
            boost_duration: 3.0,
            invincibility_duration: 5.0,
            display_duration: 3.0,
            pickup_radius: 0.08,
            pickup_respawn_delay: 5.0,
            bomb_speed: 1.0,
            bomb_trigger_distance: 0.1,
            bomb_timeout: 6.0,
            blast_radius: 0.4,
            hit_impulse: 0.8,
            hit_spin: 4.0,
            hit_lock: 1.0,
            hook_offset: 0.3,
            hook_duration: 1.0,
            gold_to_win: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub goal_laps: u32,
    pub start_delay: f32,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            goal_laps: 2,
            start_delay: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetSettings {
    pub tick_rate: u32,
    pub snapshot_rate: u32,
    /// Exponential smoothing rate applied to remote vehicles.
    pub lerp_rate: f32,
    pub heartbeat_interval: f32,
    pub peer_timeout: f32,
}

impl Default for NetSettings {
    fn default() -> Self {
        Self {
            tick_rate: 50,
            snapshot_rate: 20,
            lerp_rate: 15.0,
            heartbeat_interval: 1.0,
            peer_timeout: 5.0,
        }
    }
}

impl Settings {
    /// Loads settings from an optional YAML file, then from `TRACKRACE__*`
    /// environment variables (`TRACKRACE__RULES__GOAL_LAPS=3`). Missing keys
    /// keep their defaults.
    pub fn load(path: Option<&str>) -> Result<Settings, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("TRACKRACE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.track.progress_samples == 0 {
            return Err(invalid("track.progress_samples", "must be positive"));
        }
        if self.track.road_width <= 0.0 {
            return Err(invalid("track.road_width", "must be positive"));
        }
        if self.adherence.off_track_distance <= 0.0 || self.adherence.off_track_height <= 0.0 {
            return Err(invalid("adherence", "off-track limits must be positive"));
        }
        if self.adherence.freeze_factor < 1.0 {
            return Err(invalid("adherence.freeze_factor", "must be at least 1"));
        }
        if !(0.0..=180.0).contains(&self.adherence.flip_angle_degrees) {
            return Err(invalid("adherence.flip_angle_degrees", "must be within 0..=180"));
        }
        if self.motion.base_speed < 0.0 {
            return Err(invalid("motion.base_speed", "must not be negative"));
        }
        validate_cut_points(&self.items.cut_points)?;
        if self.items.gold_to_win == 0 {
            return Err(invalid("items.gold_to_win", "must be positive"));
        }
        if self.rules.goal_laps == 0 {
            return Err(invalid("rules.goal_laps", "must be positive"));
        }
        if self.net.tick_rate == 0 || self.net.snapshot_rate == 0 {
            return Err(invalid("net", "rates must be positive"));
        }
        for (field, value) in self.durations() {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "must be a finite, non-negative number of seconds"));
            }
        }
        Ok(())
    }

    fn durations(&self) -> [(&'static str, f32); 12] {
        [
            ("adherence.respawn_cooldown", self.adherence.respawn_cooldown),
            ("adherence.flip_respawn_time", self.adherence.flip_respawn_time),
            ("items.boost_duration", self.items.boost_duration),
            ("items.invincibility_duration", self.items.invincibility_duration),
            ("items.display_duration", self.items.display_duration),
            ("items.pickup_respawn_delay", self.items.pickup_respawn_delay),
            ("items.bomb_timeout", self.items.bomb_timeout),
            ("items.hit_lock", self.items.hit_lock),
            ("items.hook_duration", self.items.hook_duration),
            ("rules.start_delay", self.rules.start_delay),
            ("net.heartbeat_interval", self.net.heartbeat_interval),
            ("net.peer_timeout", self.net.peer_timeout),
        ]
    }

    pub fn start_delay(&self) -> Duration {
        secs(self.rules.start_delay)
    }
}

pub(crate) fn validate_cut_points(cut_points: &[u32]) -> Result<(), SettingsError> {
    if cut_points.len() != 7 {
        return Err(invalid(
            "items.cut_points",
            format!("expected 7 entries, got {}", cut_points.len()),
        ));
    }
    if cut_points.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(invalid("items.cut_points", "must be non-decreasing"));
    }
    if cut_points[6] != 100 {
        return Err(invalid("items.cut_points", "last entry must be 100"));
    }
    Ok(())
}

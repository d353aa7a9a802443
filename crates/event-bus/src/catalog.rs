//! # Event Catalog
//!
//! Known event types that flow through the bus, with their delivery priority,
//! category, and the channel each one is conventionally published on.
//!
//! Events on the wire carry their type as a plain dotted string, so types not
//! listed here are still valid; they are treated as [`EventPriority::Normal`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Delivery priority used by logging, metrics, filtering, and the priority queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl EventPriority {
    /// All priorities from most to least urgent.
    pub const DESCENDING: [EventPriority; 4] = [
        EventPriority::Critical,
        EventPriority::High,
        EventPriority::Normal,
        EventPriority::Low,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broad grouping of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    System,
    Game,
    Hardware,
    Network,
    User,
    Error,
}

/// Returned when parsing a type string that is not in the catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown event type: {0}")]
pub struct UnknownEventType(pub String);

macro_rules! event_catalog {
    ($($variant:ident => $name:literal, $priority:ident, $category:ident;)+) => {
        /// All event types known to the platform.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventType {
            $($variant,)+
        }

        impl EventType {
            /// Every catalogued type, in declaration order.
            pub const ALL: &'static [EventType] = &[$(EventType::$variant,)+];

            /// Dotted wire name, e.g. `game.move.executed`.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(EventType::$variant => $name,)+
                }
            }

            #[must_use]
            pub fn priority(self) -> EventPriority {
                match self {
                    $(EventType::$variant => EventPriority::$priority,)+
                }
            }

            #[must_use]
            pub fn category(self) -> EventCategory {
                match self {
                    $(EventType::$variant => EventCategory::$category,)+
                }
            }
        }

        impl FromStr for EventType {
            type Err = UnknownEventType;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(EventType::$variant),)+
                    other => Err(UnknownEventType(other.to_string())),
                }
            }
        }
    };
}

event_catalog! {
    // =========================================================================
    // SERVICE LIFECYCLE
    // =========================================================================
    ServiceStarted => "service.started", Normal, System;
    ServiceStopped => "service.stopped", High, System;
    ServiceError => "service.error", Critical, Error;
    ServiceHealthCheck => "service.health_check", Low, System;

    // =========================================================================
    // GAME MANAGEMENT
    // =========================================================================
    GameCreated => "game.created", Normal, Game;
    GameStarted => "game.started", Normal, Game;
    GamePaused => "game.paused", Normal, Game;
    GameResumed => "game.resumed", Normal, Game;
    GameFinished => "game.finished", Normal, Game;
    GameAbandoned => "game.abandoned", High, Game;
    GameError => "game.error", High, Error;

    // =========================================================================
    // MOVES
    // =========================================================================
    MoveRequested => "game.move.requested", High, Game;
    MoveValidated => "game.move.validated", High, Game;
    MoveExecuted => "game.move.executed", High, Game;
    MoveCompleted => "game.move.completed", Normal, Game;
    MoveFailed => "game.move.failed", High, Error;

    // =========================================================================
    // AI ENGINE
    // =========================================================================
    AiMoveRequest => "ai.move.request", High, System;
    AiMoveResult => "ai.move.result", High, System;
    AiAnalysisRequest => "ai.analysis.request", Normal, System;
    AiAnalysisResult => "ai.analysis.result", Normal, System;
    AiEngineReady => "ai.engine.ready", Normal, System;
    AiEngineBusy => "ai.engine.busy", Normal, System;
    AiEngineError => "ai.engine.error", Critical, Error;

    // =========================================================================
    // VISION
    // =========================================================================
    VisionBoardDetected => "vision.board.detected", High, Hardware;
    VisionMoveDetected => "vision.move.detected", High, Hardware;
    VisionPieceDetected => "vision.piece.detected", Normal, Hardware;
    VisionCalibrationStarted => "vision.calibration.started", Normal, Hardware;
    VisionCalibrationCompleted => "vision.calibration.completed", Normal, Hardware;
    VisionError => "vision.error", Critical, Error;

    // =========================================================================
    // ROBOT CONTROL
    // =========================================================================
    RobotMoveCommand => "robot.move.command", High, Hardware;
    RobotMoveStarted => "robot.move.started", High, Hardware;
    RobotMoveCompleted => "robot.move.completed", Normal, Hardware;
    RobotMoveFailed => "robot.move.failed", Critical, Error;
    RobotCalibrationStarted => "robot.calibration.started", Normal, Hardware;
    RobotCalibrationCompleted => "robot.calibration.completed", Normal, Hardware;
    RobotError => "robot.error", Critical, Error;
    RobotStatusChanged => "robot.status.changed", Normal, Hardware;

    // =========================================================================
    // WEB GATEWAY
    // =========================================================================
    WebClientConnected => "web.client.connected", Low, Network;
    WebClientDisconnected => "web.client.disconnected", Low, Network;
    WebMessageReceived => "web.message.received", Normal, Network;
    WebMessageSent => "web.message.sent", Normal, Network;

    // =========================================================================
    // CALIBRATION
    // =========================================================================
    CalibrationStepStarted => "calibration.step.started", Normal, System;
    CalibrationStepCompleted => "calibration.step.completed", Normal, System;
    CalibrationStepFailed => "calibration.step.failed", High, System;
    CalibrationCompleted => "calibration.completed", High, System;
    CalibrationFailed => "calibration.failed", High, System;

    // =========================================================================
    // MONITORING
    // =========================================================================
    MetricsUpdated => "metrics.updated", Low, System;
    AlertTriggered => "alert.triggered", High, System;
    HealthCheckFailed => "health.check.failed", High, Error;
}

impl EventType {
    /// Suggested channel for publishing this event type.
    ///
    /// Service and game identifiers narrow the channel when provided.
    #[must_use]
    pub fn suggested_channel(self, service_name: Option<&str>, game_id: Option<&str>) -> String {
        use EventType::*;

        match self {
            ServiceStarted | ServiceStopped | ServiceError => match service_name {
                Some(name) => format!("service.{name}.status"),
                None => "service.status".to_string(),
            },
            GameCreated | GameStarted | GameFinished => match game_id {
                Some(id) => format!("game.{id}.status"),
                None => "game.status".to_string(),
            },
            MoveRequested | MoveExecuted | MoveCompleted => match game_id {
                Some(id) => format!("game.{id}.moves"),
                None => "game.moves".to_string(),
            },
            AiMoveRequest | AiMoveResult => "ai.moves".to_string(),
            AiAnalysisRequest | AiAnalysisResult => "ai.analysis".to_string(),
            MetricsUpdated | AlertTriggered => "system.monitoring".to_string(),
            other => {
                let name = other.as_str();
                if name.starts_with("vision.") {
                    "vision.events".to_string()
                } else if name.starts_with("robot.") {
                    "robot.events".to_string()
                } else if name.starts_with("web.") {
                    "web.events".to_string()
                } else {
                    "system.events".to_string()
                }
            }
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a wire type string; unknown types are `Normal`.
#[must_use]
pub fn priority_of(event_type: &str) -> EventPriority {
    event_type
        .parse::<EventType>()
        .map_or(EventPriority::Normal, EventType::priority)
}

/// Category of a wire type string; unknown types are `System`.
#[must_use]
pub fn category_of(event_type: &str) -> EventCategory {
    event_type
        .parse::<EventType>()
        .map_or(EventCategory::System, EventType::category)
}

/// Well-known channels and channel patterns.
pub mod channels {
    pub const SERVICE_STATUS: &str = "service.*.status";
    pub const SERVICE_EVENTS: &str = "service.*.events";
    pub const SERVICE_METRICS: &str = "service.*.metrics";
    pub const SERVICE_LOGS: &str = "service.*.logs";

    pub const GAME_EVENTS: &str = "game.*";
    pub const GAME_MOVES: &str = "game.*.moves";
    pub const GAME_STATUS: &str = "game.*.status";

    pub const AI_REQUESTS: &str = "ai.requests";
    pub const AI_RESPONSES: &str = "ai.responses";
    pub const AI_ANALYSIS: &str = "ai.analysis";

    pub const VISION_DETECTION: &str = "vision.detection";
    pub const VISION_ANALYSIS: &str = "vision.analysis";
    pub const VISION_CALIBRATION: &str = "vision.calibration";

    pub const ROBOT_COMMANDS: &str = "robot.commands";
    pub const ROBOT_STATUS: &str = "robot.status";
    pub const ROBOT_MOVES: &str = "robot.moves";

    pub const WEB_CLIENTS: &str = "web.clients.*";
    pub const WEB_BROADCASTS: &str = "web.broadcasts";

    pub const SYSTEM_ALERTS: &str = "system.alerts";
    pub const SYSTEM_METRICS: &str = "system.metrics";
    pub const SYSTEM_HEALTH: &str = "system.health";

    /// Named groups of subscription patterns.
    const GROUPS: &[(&str, &[&str])] = &[
        ("all_events", &["*"]),
        ("system_events", &["system.*"]),
        ("service_events", &["service.*"]),
        ("game_events", &["game.*"]),
        ("hardware_events", &["vision.*", "robot.*"]),
        ("network_events", &["web.*"]),
        ("error_events", &["*.error"]),
        ("high_priority_events", &["*.critical", "*.error", "game.*.moves"]),
    ];

    /// Patterns for the named groups; unknown names are skipped.
    ///
    /// An empty group list subscribes to everything.
    #[must_use]
    pub fn patterns_for(groups: &[&str]) -> Vec<&'static str> {
        if groups.is_empty() {
            return vec!["*"];
        }

        groups
            .iter()
            .filter_map(|group| GROUPS.iter().find(|(name, _)| name == group))
            .flat_map(|(_, patterns)| patterns.iter().copied())
            .collect()
    }
}

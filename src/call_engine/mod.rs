//! Call Engine Module - Sitzung und RTC-Engine
//!
//! Dieses Modul verwaltet:
//! - Die Schnittstelle zur externen RTC-Engine (Kommandos und Events)
//! - Die Call-State-Maschine (Session Controller)
//! - Die Liste der Remote-Teilnehmer
//! - Eine Loopback-Engine für Betrieb ohne natives SDK

mod controller;
mod engine;
pub mod loopback;
mod roster;

pub use controller::{SessionController, SessionError, SessionSnapshot, AUTO_ASSIGN_UID};
pub use engine::{
    CallState, EngineError, EngineEvent, EngineFactory, EventSink, OfflineReason, RtcEngine,
    VirtualBackgroundReason,
};
pub use loopback::{EngineCommand, LoopbackFactory, LoopbackHandle, LoopbackOptions};
pub use roster::ParticipantRoster;

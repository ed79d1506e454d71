//! MathMission · mission and answer lifecycle client for the math tutoring backend
//!
//! - `Session` ties auth, the mission store and the answer store together
//! - `HttpGateway` talks to the REST backend (JSON envelopes, multipart uploads)
//! - Stores derive their phase from state and drop responses that arrive after a reset

pub mod answer;
pub mod api;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod domain;
pub mod error;
pub mod images;
pub mod mission;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod timer;
pub mod util;


pub use answer::{AnswerPhase, AnswerStore, GRADING_POLL_INTERVAL};
pub use api::{ApiGateway, HttpGateway};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, StoreError};
pub use mission::{MissionPhase, MissionStore};
pub use session::Session;

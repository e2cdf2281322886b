// Core data model for the automation engine.

pub mod campaign;
pub mod event;
pub mod message;
pub mod subject;

pub use campaign::{Campaign, CampaignStep, Enrollment, EnrollmentStatus};
pub use event::{event_types, BehavioralEvent, NewEvent, RecordOutcome};
pub use message::{
    Audience, Channel, MessagePayload, MessageStatus, MessageTemplate, NotificationRequest,
    Priority, ScheduledMessage,
};
pub use subject::{FollowUpTask, OperatorAlert, SubjectProfile};

//! Database repositories.

mod campaign;
mod contact;
mod message;
mod template;

pub use campaign::CampaignRepository;
pub use contact::ContactRepository;
pub use message::MessageRepository;
pub use template::TemplateRepository;

pub mod channels;
pub mod messages;

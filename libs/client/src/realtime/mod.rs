pub mod events;
pub mod listeners;
pub mod rooms;
pub mod router;

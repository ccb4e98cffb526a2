mod spawner;
mod messages;

pub use spawner::FridaDevice;

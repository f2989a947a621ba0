pub use self::{
    client::{ContainerRuntime, RuntimeAction, RuntimeClient, RuntimeEvent},
    error::RuntimeError,
    service::{ContainerRef, DeadContainer, PortType, Service, ServicePort},
};

pub mod client;
pub mod derive;
pub mod env;
pub mod error;
pub mod id;
pub mod ports;
pub mod service;
pub mod tags;

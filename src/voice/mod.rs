//! # Voice Module
//!
//! Coordinación de sesiones de voz y colas de reproducción por guild.
//!
//! Las piezas, de abajo hacia arriba:
//!
//! - [`queue`]: la cola de reproducción por guild; la cabeza es la pista
//!   en reproducción.
//! - [`handshake`]: empareja las dos mitades del handshake de voz del
//!   gateway (voice-state y voice-server), que llegan en cualquier orden.
//! - [`node`]: el cliente del nodo de audio externo y su política de
//!   reintentos y acuses.
//! - [`session`]: una sesión por guild detrás de su punto de
//!   serialización; los comandos de una guild quedan totalmente ordenados.
//! - [`coordinator`]: la máquina de estados que une todo lo anterior y
//!   expone la superficie de comandos.

pub mod coordinator;
pub mod handshake;
pub mod node;
pub mod queue;
pub mod session;

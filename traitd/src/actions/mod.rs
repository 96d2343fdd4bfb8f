// SPDX-License-Identifier: MIT
//
// Author: Johannes Leupolz <dev@leupolz.eu>

pub mod action;
pub mod routing_handler;

pub use action::Action;
pub use routing_handler::RoutingHandler;

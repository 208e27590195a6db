//! This module holds the single [`Ray`] and the packet [`RayK`] records together with
//! their hit fields.
mod packet;
mod ray_impl;

pub use self::packet::*;
pub use self::ray_impl::*;

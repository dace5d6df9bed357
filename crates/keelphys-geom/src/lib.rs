pub mod aabb;
pub mod shape;
pub mod contact;
pub mod material;
pub mod mass;

pub use aabb::Aabb;
pub use shape::{bounds, Shape};
pub use contact::{
    particle_particle_contact, particle_shape_contact, particle_shape_surface_contact,
    shape_shape_contact, PointContact, SurfaceContact,
};
pub use material::Material;
pub use mass::MassProps;

pub mod compositor;
pub mod fill;
pub mod stroke;
pub mod transform;

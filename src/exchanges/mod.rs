pub mod coinstore;
pub mod p2b;
pub mod uzx;

pub mod hwdetect;
pub mod pool;

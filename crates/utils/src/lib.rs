pub mod ranges;
pub mod sorted_vec;

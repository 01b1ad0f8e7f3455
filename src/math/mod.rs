pub mod ewma;

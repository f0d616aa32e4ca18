pub mod ccs_check;

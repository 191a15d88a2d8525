pub mod tail_service;

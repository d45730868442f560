pub mod environment_dto;
pub mod grid_dto;
pub mod result_dto;

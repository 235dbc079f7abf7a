pub mod prices;
pub mod setup;
pub mod simulate;
pub mod ui;

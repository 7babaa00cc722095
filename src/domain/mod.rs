// Domain layer - Panels, series and the template catalogue
pub mod panel;
pub mod series;
pub mod template;

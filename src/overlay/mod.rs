mod mapper;
mod raster;
mod renderer;
#[cfg(test)]
mod tests;

pub use mapper::{map_rect, FitPolicy, FitTransform, Size};
pub use raster::{rasterize, MAX_RASTER_SIDE};
pub use renderer::{CategoryPalette, OverlayModel, OverlayRenderer, OverlayShape, OverlayStyle, Rgb};

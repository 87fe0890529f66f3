//! Built-in plugins: web search, scraping, weather and image generation.

pub mod image;
pub mod scrape;
pub mod search;
pub mod weather;

pub use image::ImageGenerationTool;
pub use scrape::WebScrapeTool;
pub use search::WebSearchTool;
pub use weather::WeatherTool;

pub mod tiled_upscale;

use std::fmt;
use std::str::FromStr;

use crate::error::SettingsError;
use crate::image::ImageBuffer;
use crate::settings::{AdjustmentSettings, BackdropStyle, Intensity, PresetCategory, SwapType};

const OPENING: &str = "Edit this image. ";
const COMPOSITION_LOCK: &str = "CRITICAL: Preserve the EXACT original aspect ratio, framing, and composition. Do NOT crop, zoom, or distort the image. The subject's position, size, and perspective must remain unchanged. ";
const SWAP_HEADER: &str = "INTELLIGENT ASSET INTEGRATION: ";
const CLOSING: &str = " Return ONLY the edited image.";
const CUSTOM_MARKER: &str = " ADDITIONAL INSTRUCTIONS: ";

const REFERENCE_ASSET_BLOCK: &[&str] = &[
    "The first image is the TARGET SCENE (User Image). The second image is the REFERENCE ASSET. ",
    "Analyze the REFERENCE ASSET to understand its category (e.g., dress, shirt, shoes, furniture, accessory). ",
    "LOGIC FOR APPLICATION: ",
    "1. IF CLOTHING (Dress, Gown, Suit, Shirt): Perform a structural replacement on the subject in the Target Scene. Detect the body pose (sitting, standing, arms positions) and drape the Reference Asset fabric naturally over the body. Maintain skin tones of the original subject where exposed. If it's a dress, replace the entire outfit. ",
    "2. IF FOOTWEAR: Identify the feet of the subject. Replace existing shoes with the Reference Asset. Align with the ground plane and perspective. ",
    "3. IF OBJECT: Place the object in the most logical position (e.g., in hand if it's a tool, on table if it's a cup). Match the perspective of the scene. ",
    "LIGHTING & REALISM: Strictly match the lighting direction, color temperature, and shadow intensity of the Target Scene. The result must be seamless. Do not warp the background. ",
];

const CLEAN_BACKDROP_BLOCK: &[&str] = &[
    "Clean the existing background. Remove wrinkles, dirt, and imperfections. Keep the original color but make it smooth. ",
    "Do not alter the subject boundaries or the composition of the photo. ",
];

/// Prompt text plus the optional second image sent with it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPrompt {
    pub text: String,
    pub reference_image: Option<ImageBuffer>,
}

/// Builds the instruction string for the current settings.
///
/// Pure and deterministic. Object-swap settings with neither an asset nor a
/// preset still compile; submission is blocked by
/// [`AdjustmentSettings::validate`].
pub fn compile(settings: &AdjustmentSettings) -> CompiledPrompt {
    let mut text = String::from(OPENING);
    text.push_str(COMPOSITION_LOCK);
    let mut reference_image = None;

    match settings.backdrop_style() {
        BackdropStyle::ObjectSwap => {
            text.push_str(SWAP_HEADER);
            match (settings.swap_type(), settings.swap_asset(), settings.swap_preset()) {
                (SwapType::Upload, Some(asset), _) => {
                    for line in REFERENCE_ASSET_BLOCK {
                        text.push_str(line);
                    }
                    reference_image = Some(asset.clone());
                }
                (SwapType::Preset, _, Some(preset)) => {
                    text.push_str(&preset_clause(preset.category(), preset.label()));
                }
                _ => {}
            }
        }
        BackdropStyle::Clean => {
            for line in CLEAN_BACKDROP_BLOCK {
                text.push_str(line);
            }
            text.push_str(intensity_clause(settings.intensity()));
        }
    }

    if !settings.custom_instructions().trim().is_empty() {
        text.push_str(CUSTOM_MARKER);
        text.push_str(settings.custom_instructions());
    }

    text.push_str(CLOSING);
    CompiledPrompt {
        text,
        reference_image,
    }
}

fn intensity_clause(intensity: Intensity) -> &'static str {
    match intensity {
        Intensity::Gentle => "Be subtle. Keep the natural depth and original feel. ",
        Intensity::Standard => "Make it look professional and clean. ",
        Intensity::Aggressive => "Make it perfectly smooth and digital. Remove all distractions. ",
    }
}

fn preset_clause(category: PresetCategory, label: &str) -> String {
    let label = label.to_lowercase();
    match category {
        PresetCategory::Clothing => format!(
            "Perform a high-fashion virtual try-on. Replace the current outfit of the subject with a stylish, high-quality {label}. Adapt the clothing to the subject's exact body pose and body shape. Ensure realistic fabric folds and lighting integration. Do not alter the subject's face or body proportions. "
        ),
        PresetCategory::Footwear => format!(
            "Replace the subject's footwear with premium {label}. Ensure they touch the ground realistically with correct contact shadows. Keep the original leg position. "
        ),
        PresetCategory::Object => format!(
            "Intelligently place a {label} in the scene where it makes the most sense contextually. Ensure photorealistic lighting and perspective. "
        ),
    }
}

/// Candidates produced per object replacement.
pub const MASK_VARIATIONS: usize = 4;

/// Prompt for replacing the white area of a binarized mask. The mask travels
/// as the reference image, after the source.
pub fn compile_mask_replacement(mask: &ImageBuffer, replacement: &str) -> CompiledPrompt {
    let text = format!(
        "Use the provided black and white mask image to identify the area to edit in the original image. Replace the masked area (white area in the mask) with: \"{}\". Blend the new object seamlessly into the original environment, matching lighting, shadows, and perspective.",
        replacement.trim()
    );
    CompiledPrompt {
        text,
        reference_image: Some(mask.clone()),
    }
}

/// Named output ratios the editing model accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Square,
    Portrait3x4,
    Landscape4x3,
    Portrait9x16,
    Landscape16x9,
}

impl AspectRatio {
    /// Scan order for nearest-match selection; earlier entries win ties.
    pub const TABLE: [(AspectRatio, f64); 5] = [
        (AspectRatio::Square, 1.0),
        (AspectRatio::Portrait3x4, 0.75),
        (AspectRatio::Landscape4x3, 1.3333),
        (AspectRatio::Portrait9x16, 0.5625),
        (AspectRatio::Landscape16x9, 1.7778),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
        }
    }

    /// Nearest supported ratio for a width / height quotient.
    pub fn nearest(ratio: f64) -> Self {
        let mut best = AspectRatio::Square;
        let mut best_delta = f64::MAX;
        for (candidate, value) in Self::TABLE {
            let delta = (ratio - value).abs();
            if delta < best_delta {
                best = candidate;
                best_delta = delta;
            }
        }
        best
    }

    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return AspectRatio::Square;
        }
        Self::nearest(width as f64 / height as f64)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = SettingsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        Self::TABLE
            .iter()
            .map(|(ratio, _)| *ratio)
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| SettingsError::UnknownValue {
                field: "aspect ratio",
                value: trimmed.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{compile, compile_mask_replacement, AspectRatio};
    use crate::image::ImageBuffer;
    use crate::settings::{AdjustmentSettings, BackdropStyle, Intensity, ObjectPreset};

    const COMPOSITION: &str = "Do NOT crop, zoom, or distort the image.";
    const CLOSING: &str = "Return ONLY the edited image.";

    #[test]
    fn clean_gentle_prompt_has_fixed_clauses() {
        let settings = AdjustmentSettings::default().with_intensity(Intensity::Gentle);
        let compiled = compile(&settings);
        assert!(compiled.text.starts_with("Edit this image. CRITICAL:"));
        assert!(compiled.text.contains(COMPOSITION));
        assert!(compiled.text.contains("Clean the existing background."));
        assert!(compiled.text.contains("Be subtle. Keep the natural depth and original feel."));
        assert!(!compiled.text.contains("Make it look professional and clean."));
        assert!(!compiled.text.contains("ADDITIONAL INSTRUCTIONS"));
        assert!(compiled.text.ends_with(CLOSING));
        assert!(compiled.reference_image.is_none());
    }

    #[test]
    fn each_intensity_selects_one_phrase() {
        let phrases = [
            (Intensity::Gentle, "Be subtle."),
            (Intensity::Standard, "Make it look professional and clean."),
            (Intensity::Aggressive, "Make it perfectly smooth and digital."),
        ];
        for (intensity, phrase) in phrases {
            let text = compile(&AdjustmentSettings::default().with_intensity(intensity)).text;
            for (_, other) in phrases {
                assert_eq!(text.contains(other), other == phrase, "{intensity}: {other}");
            }
        }
    }

    #[test]
    fn uploaded_asset_becomes_reference_image() {
        let asset = ImageBuffer::new(vec![1, 2, 3], "image/png");
        let settings = AdjustmentSettings::default()
            .with_backdrop_style(BackdropStyle::ObjectSwap)
            .with_swap_asset(asset.clone());
        let compiled = compile(&settings);
        assert_eq!(compiled.reference_image, Some(asset));
        assert!(compiled.text.contains("INTELLIGENT ASSET INTEGRATION: "));
        assert!(compiled.text.contains("The first image is the TARGET SCENE"));
        assert!(compiled.text.contains("1. IF CLOTHING"));
        assert!(compiled.text.contains("2. IF FOOTWEAR"));
        assert!(compiled.text.contains("3. IF OBJECT"));
        assert!(compiled.text.contains("LIGHTING & REALISM"));
        assert!(!compiled.text.contains("Clean the existing background."));
        assert!(compiled.text.ends_with(CLOSING));
    }

    #[test]
    fn presets_pick_category_phrasing_without_reference() {
        let base = AdjustmentSettings::default().with_backdrop_style(BackdropStyle::ObjectSwap);

        let clothes = compile(&base.clone().with_swap_preset(ObjectPreset::Clothes));
        assert!(clothes.text.contains("virtual try-on"));
        assert!(clothes.text.contains("high-quality clothes."));
        assert!(clothes.reference_image.is_none());

        let shoes = compile(&base.clone().with_swap_preset(ObjectPreset::Shoes));
        assert!(shoes.text.contains("Replace the subject's footwear with premium shoes."));

        let watch = compile(&base.with_swap_preset(ObjectPreset::Watch));
        assert!(watch.text.contains("Intelligently place a watch in the scene"));
        assert!(!watch.text.contains("TARGET SCENE"));
    }

    #[test]
    fn swap_without_input_still_compiles() {
        let settings = AdjustmentSettings::default().with_backdrop_style(BackdropStyle::ObjectSwap);
        let compiled = compile(&settings);
        assert!(compiled
            .text
            .contains("INTELLIGENT ASSET INTEGRATION:  Return ONLY the edited image."));
        assert!(compiled.reference_image.is_none());
    }

    #[test]
    fn custom_instructions_are_appended_before_closing() {
        let settings =
            AdjustmentSettings::default().with_custom_instructions("Keep the logo on the wall");
        let text = compile(&settings).text;
        assert!(text.ends_with(
            " ADDITIONAL INSTRUCTIONS: Keep the logo on the wall Return ONLY the edited image."
        ));

        let blank = AdjustmentSettings::default().with_custom_instructions("   \n");
        assert!(!compile(&blank).text.contains("ADDITIONAL INSTRUCTIONS"));
    }

    #[test]
    fn mask_replacement_quotes_the_object_and_attaches_mask() {
        let mask = ImageBuffer::new(vec![0, 255], "image/png");
        let compiled = compile_mask_replacement(&mask, "  Glass Vase with Lilies ");
        assert_eq!(
            compiled.text,
            "Use the provided black and white mask image to identify the area to edit in the original image. Replace the masked area (white area in the mask) with: \"Glass Vase with Lilies\". Blend the new object seamlessly into the original environment, matching lighting, shadows, and perspective."
        );
        assert_eq!(compiled.reference_image, Some(mask));
    }

    #[test]
    fn compile_is_deterministic() {
        let settings = AdjustmentSettings::default().with_intensity(Intensity::Aggressive);
        assert_eq!(compile(&settings), compile(&settings));
    }

    #[test]
    fn aspect_ratio_picks_nearest_entry() {
        assert_eq!(AspectRatio::nearest(1.77), AspectRatio::Landscape16x9);
        assert_eq!(AspectRatio::nearest(1.0), AspectRatio::Square);
        assert_eq!(AspectRatio::nearest(0.70), AspectRatio::Portrait3x4);
        assert_eq!(AspectRatio::from_dimensions(1920, 1080).as_str(), "16:9");
        assert_eq!(AspectRatio::from_dimensions(1080, 1920).as_str(), "9:16");
        assert_eq!(AspectRatio::from_dimensions(0, 100), AspectRatio::Square);
    }

    #[test]
    fn aspect_ratio_ties_keep_earlier_entry() {
        // Exactly halfway between 1:1 and 3:4.
        assert_eq!(AspectRatio::nearest(0.875), AspectRatio::Square);
    }

    #[test]
    fn aspect_ratio_parses_names() {
        assert_eq!("4:3".parse::<AspectRatio>(), Ok(AspectRatio::Landscape4x3));
        assert!("2:1".parse::<AspectRatio>().is_err());
    }
}

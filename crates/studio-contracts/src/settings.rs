use std::fmt;
use std::str::FromStr;

use serde_json::{json, Value};

use crate::error::SettingsError;
use crate::image::ImageBuffer;

pub const MIN_VARIATIONS: usize = 1;
pub const MAX_VARIATIONS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intensity {
    Gentle,
    #[default]
    Standard,
    Aggressive,
}

impl Intensity {
    pub const ALL: [Intensity; 3] = [Intensity::Gentle, Intensity::Standard, Intensity::Aggressive];

    pub fn id(self) -> &'static str {
        match self {
            Intensity::Gentle => "gentle",
            Intensity::Standard => "standard",
            Intensity::Aggressive => "aggressive",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Intensity::Gentle => "Gentle",
            Intensity::Standard => "Standard",
            Intensity::Aggressive => "Deep Clean",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackdropStyle {
    #[default]
    Clean,
    ObjectSwap,
}

impl BackdropStyle {
    pub fn id(self) -> &'static str {
        match self {
            BackdropStyle::Clean => "clean",
            BackdropStyle::ObjectSwap => "object-swap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapType {
    #[default]
    Upload,
    Preset,
}

impl SwapType {
    pub fn id(self) -> &'static str {
        match self {
            SwapType::Upload => "upload",
            SwapType::Preset => "preset",
        }
    }
}

/// How the prompt compiler phrases a preset swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetCategory {
    Clothing,
    Footwear,
    Object,
}

/// Predefined swap-in object, used instead of an uploaded asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectPreset {
    Shoes,
    Clothes,
    Bag,
    Watch,
    Glasses,
}

impl ObjectPreset {
    /// Declaration order is the display order.
    pub const ALL: [ObjectPreset; 5] = [
        ObjectPreset::Shoes,
        ObjectPreset::Clothes,
        ObjectPreset::Bag,
        ObjectPreset::Watch,
        ObjectPreset::Glasses,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ObjectPreset::Shoes => "shoes",
            ObjectPreset::Clothes => "clothes",
            ObjectPreset::Bag => "bag",
            ObjectPreset::Watch => "watch",
            ObjectPreset::Glasses => "glasses",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectPreset::Shoes => "Shoes",
            ObjectPreset::Clothes => "Clothes",
            ObjectPreset::Bag => "Bag",
            ObjectPreset::Watch => "Watch",
            ObjectPreset::Glasses => "Glasses",
        }
    }

    pub fn category(self) -> PresetCategory {
        match self {
            ObjectPreset::Clothes => PresetCategory::Clothing,
            ObjectPreset::Shoes => PresetCategory::Footwear,
            ObjectPreset::Bag | ObjectPreset::Watch | ObjectPreset::Glasses => {
                PresetCategory::Object
            }
        }
    }
}

macro_rules! id_enum_traits {
    ($ty:ty, $field:literal, $variants:expr) => {
        impl FromStr for $ty {
            type Err = SettingsError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let normalized = raw.trim().to_ascii_lowercase();
                $variants
                    .into_iter()
                    .find(|variant| variant.id() == normalized)
                    .ok_or_else(|| SettingsError::UnknownValue {
                        field: $field,
                        value: raw.trim().to_string(),
                    })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.id())
            }
        }
    };
}

id_enum_traits!(Intensity, "intensity", Intensity::ALL);
id_enum_traits!(
    BackdropStyle,
    "backdrop style",
    [BackdropStyle::Clean, BackdropStyle::ObjectSwap]
);
id_enum_traits!(SwapType, "swap type", [SwapType::Upload, SwapType::Preset]);
id_enum_traits!(ObjectPreset, "preset", ObjectPreset::ALL);

/// User-editable generation settings.
///
/// The value is immutable; every `with_*` method returns an updated copy.
/// Picking an uploaded asset clears the preset and vice versa.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentSettings {
    intensity: Intensity,
    backdrop_style: BackdropStyle,
    custom_instructions: String,
    swap_type: SwapType,
    swap_asset: Option<ImageBuffer>,
    swap_preset: Option<ObjectPreset>,
    variation_count: usize,
}

impl Default for AdjustmentSettings {
    fn default() -> Self {
        Self {
            intensity: Intensity::default(),
            backdrop_style: BackdropStyle::default(),
            custom_instructions: String::new(),
            swap_type: SwapType::default(),
            swap_asset: None,
            swap_preset: None,
            variation_count: MIN_VARIATIONS,
        }
    }
}

impl AdjustmentSettings {
    pub fn intensity(&self) -> Intensity {
        self.intensity
    }

    pub fn backdrop_style(&self) -> BackdropStyle {
        self.backdrop_style
    }

    pub fn custom_instructions(&self) -> &str {
        &self.custom_instructions
    }

    pub fn swap_type(&self) -> SwapType {
        self.swap_type
    }

    pub fn swap_asset(&self) -> Option<&ImageBuffer> {
        self.swap_asset.as_ref()
    }

    pub fn swap_preset(&self) -> Option<ObjectPreset> {
        self.swap_preset
    }

    pub fn variation_count(&self) -> usize {
        self.variation_count
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = intensity;
        self
    }

    pub fn with_backdrop_style(mut self, style: BackdropStyle) -> Self {
        self.backdrop_style = style;
        self
    }

    pub fn with_custom_instructions(mut self, text: impl Into<String>) -> Self {
        self.custom_instructions = text.into();
        self
    }

    pub fn with_swap_asset(mut self, asset: ImageBuffer) -> Self {
        self.swap_type = SwapType::Upload;
        self.swap_asset = Some(asset);
        self.swap_preset = None;
        self
    }

    /// Drops the uploaded asset and falls back to preset mode with nothing
    /// selected.
    pub fn without_swap_asset(mut self) -> Self {
        self.swap_asset = None;
        self.swap_type = SwapType::Preset;
        self
    }

    pub fn with_swap_preset(mut self, preset: ObjectPreset) -> Self {
        self.swap_type = SwapType::Preset;
        self.swap_preset = Some(preset);
        self.swap_asset = None;
        self
    }

    pub fn with_variation_count(mut self, count: usize) -> Result<Self, SettingsError> {
        if !(MIN_VARIATIONS..=MAX_VARIATIONS).contains(&count) {
            return Err(SettingsError::VariationCount(count));
        }
        self.variation_count = count;
        Ok(self)
    }

    /// Checks the preconditions for submitting a generation request.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(MIN_VARIATIONS..=MAX_VARIATIONS).contains(&self.variation_count) {
            return Err(SettingsError::VariationCount(self.variation_count));
        }
        if self.backdrop_style != BackdropStyle::ObjectSwap {
            return Ok(());
        }
        match self.swap_type {
            SwapType::Upload if self.swap_asset.is_none() => Err(SettingsError::MissingSwapAsset),
            SwapType::Preset if self.swap_preset.is_none() => {
                Err(SettingsError::MissingSwapPreset)
            }
            _ => Ok(()),
        }
    }

    /// JSON snapshot for manifests and event payloads. The asset is reduced
    /// to its digest.
    pub fn snapshot(&self) -> Value {
        json!({
            "intensity": self.intensity.id(),
            "backdrop_style": self.backdrop_style.id(),
            "custom_instructions": self.custom_instructions,
            "swap_type": self.swap_type.id(),
            "swap_asset": self.swap_asset.as_ref().map(ImageBuffer::digest),
            "swap_preset": self.swap_preset.map(ObjectPreset::id),
            "variation_count": self.variation_count,
        })
    }
}

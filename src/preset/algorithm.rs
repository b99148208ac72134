//! Effect algorithms and their parameter maps
//!
//! An effect record stores its parameters in a block indexed by parameter
//! number. Which name lives at which number depends on the algorithm, so
//! each algorithm carries its own map. `None` marks a reserved slot.

use crate::sysex::MAX_PARAM_VALUE;
use std::fmt;

/// The eleven M300 effect algorithms, in device ID order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RandomHall,
    Ambience,
    Plate,
    StereoAdjust,
    StereoPitchShift,
    TwinEcho,
    SmallReverb,
    MonoPitchShift,
    MonoCompressor,
    Pons,
    SmallStereoAdjust,
}

const RANDOM_HALL: &[Option<&str>] = &[
    Some("size"), None, Some("rtim"), Some("xovr"), Some("bass"), Some("roll"),
    Some("tdcy"), Some("diff"), Some("pdly"), Some("link"), Some("sprd"), Some("shap"),
    Some("dly1"), Some("lvl1"), Some("dly2"), Some("lvl2"), Some("dly3"), Some("lvl3"),
    Some("dly4"), Some("lvl4"), Some("spin"), Some("wand"), Some("fbk3"), Some("fbk4"),
    Some("rlvl"), Some("shlf"),
];

const AMBIENCE: &[Option<&str>] = &[
    Some("size"), None, Some("rtim"), Some("rlvl"), Some("roll"), Some("spin"),
    Some("wand"), Some("diff"), Some("pdly"), Some("ddly"),
];

const PLATE: &[Option<&str>] = &[
    Some("size"), None, Some("rtim"), Some("xovr"), Some("bass"), Some("roll"),
    Some("tdcy"), Some("diff"), Some("pdly"), Some("link"), Some("sprd"), Some("shap"),
    Some("dly1"), Some("fbk1"), Some("dly2"), Some("fbk2"), Some("dly3"), Some("lvl3"),
    Some("dly4"), Some("lvl4"), Some("dly5"), Some("lvl5"), Some("fbk5"), Some("dly6"),
    Some("lvl6"), Some("fbk6"), Some("spin"), Some("wand"), Some("rlvl"), Some("rand"),
];

const STEREO_ADJUST: &[Option<&str>] = &[
    Some("mstr"), Some("bal"), Some("rot"), Some("dlay"), Some("dem"), Some("half_sample"),
    Some("rfns"), Some("bass"), Some("treb"), Some("ltrb"), Some("rtrb"), Some("bxov"),
    Some("txov"), Some("txlr"), Some("speq"), Some("ldly"), Some("lfin"), Some("rdly"),
    Some("rfin"), Some("lfbk"), Some("lfbk_fine"), Some("rfbk"), Some("rfbk_fine"),
    Some("dcsw"), Some("ldc"), Some("rdc"), Some("shuf"),
];

const STEREO_PITCH_SHIFT: &[Option<&str>] = &[
    Some("mode"), Some("gldl"), Some("gldr"), Some("pchl"), Some("finl"), Some("pchr"),
    Some("finr"), Some("ldly"), Some("lfbk"), Some("rdly"), Some("rfbk"), Some("bnps"),
    Some("sync"),
];

const TWIN_ECHO: &[Option<&str>] = &[
    Some("fdly"), Some("lfbd"), Some("rfbd"), Some("lflg"), Some("rflg"), Some("dly1"),
    Some("fbk1"), Some("dly2"), Some("fbk2"), Some("apd1"), Some("apg1"), Some("apd2"),
    Some("apg2"), Some("dly3"), Some("fbk3"), Some("dly4"), Some("fbk4"), Some("ldly_out"),
    Some("lpan"), Some("rdly_out"), Some("rpan"),
];

const SMALL_REVERB: &[Option<&str>] = &[
    Some("rtim"), Some("size"), Some("pdly"), Some("tdcy"), Some("shap"), Some("sprd"),
    Some("bass"), Some("diff"), Some("rand"), Some("xovr"), Some("link"),
];

const MONO_PITCH_SHIFT: &[Option<&str>] = &[
    Some("pch"), Some("dly"), Some("fbk"), Some("gld"), Some("fin"), Some("bnps"),
];

const MONO_COMPRESSOR: &[Option<&str>] = &[
    Some("pdly_comp"), Some("atc"), Some("rtc"), Some("thrs"), Some("gain"), Some("slp"),
    Some("exth"), Some("exg"), Some("exsl"),
];

const PONS: &[Option<&str>] = &[Some("dith"), Some("pons_gain")];

const SMALL_STEREO_ADJUST: &[Option<&str>] = &[
    Some("mstr"), Some("bal"), Some("rot"), Some("speq"), Some("rfns"), Some("basl"),
    Some("ltrb"), Some("bxov"), Some("basr"), Some("rtrb"), Some("txlr"),
];

/// Documented value ranges; anything else is bounded by 14 bits
const PARAM_RANGES: &[(&str, u16, u16)] = &[
    ("size", 0, 127),
    ("rtim", 0, 127),
    ("pdly", 0, 500),
    ("link", 0, 1),
    ("roll", 0, 127),
    ("tdcy", 0, 127),
    ("bass", 0, 127),
    ("xovr", 0, 127),
    ("shlf", 0, 127),
    ("diff", 0, 127),
    ("shap", 0, 127),
    ("spin", 0, 127),
    ("wand", 0, 127),
    ("sprd", 0, 255),
    ("rlvl", 0, 127),
    ("ddly", 0, 500),
];

/// Random Hall factory values seeding a fresh effect record
pub(crate) const DEFAULT_VALUES: &[(&str, u16)] = &[
    ("rtim", 20),
    ("size", 37),
    ("pdly", 220),
    ("link", 1),
    ("roll", 29),
    ("tdcy", 36),
    ("bass", 12),
    ("xovr", 5),
    ("diff", 65),
    ("shap", 120),
    ("spin", 38),
    ("wand", 10),
    ("sprd", 157),
    ("dly1", 140),
    ("dly2", 200),
    ("dly3", 400),
    ("dly4", 480),
];

impl Algorithm {
    pub const ALL: [Algorithm; 11] = [
        Algorithm::RandomHall,
        Algorithm::Ambience,
        Algorithm::Plate,
        Algorithm::StereoAdjust,
        Algorithm::StereoPitchShift,
        Algorithm::TwinEcho,
        Algorithm::SmallReverb,
        Algorithm::MonoPitchShift,
        Algorithm::MonoCompressor,
        Algorithm::Pons,
        Algorithm::SmallStereoAdjust,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }

    pub fn id(self) -> u8 {
        match self {
            Algorithm::RandomHall => 0,
            Algorithm::Ambience => 1,
            Algorithm::Plate => 2,
            Algorithm::StereoAdjust => 3,
            Algorithm::StereoPitchShift => 4,
            Algorithm::TwinEcho => 5,
            Algorithm::SmallReverb => 6,
            Algorithm::MonoPitchShift => 7,
            Algorithm::MonoCompressor => 8,
            Algorithm::Pons => 9,
            Algorithm::SmallStereoAdjust => 10,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Algorithm::RandomHall => "Random Hall",
            Algorithm::Ambience => "Ambience",
            Algorithm::Plate => "Plate",
            Algorithm::StereoAdjust => "Stereo Adjust",
            Algorithm::StereoPitchShift => "Stereo Pitch Shift",
            Algorithm::TwinEcho => "Twin Echo",
            Algorithm::SmallReverb => "Small Reverb",
            Algorithm::MonoPitchShift => "Mono Pitch Shift",
            Algorithm::MonoCompressor => "Mono Compressor",
            Algorithm::Pons => "PONS",
            Algorithm::SmallStereoAdjust => "Small Stereo Adjust",
        }
    }

    /// Parameter number → name map
    pub fn param_map(self) -> &'static [Option<&'static str>] {
        match self {
            Algorithm::RandomHall => RANDOM_HALL,
            Algorithm::Ambience => AMBIENCE,
            Algorithm::Plate => PLATE,
            Algorithm::StereoAdjust => STEREO_ADJUST,
            Algorithm::StereoPitchShift => STEREO_PITCH_SHIFT,
            Algorithm::TwinEcho => TWIN_ECHO,
            Algorithm::SmallReverb => SMALL_REVERB,
            Algorithm::MonoPitchShift => MONO_PITCH_SHIFT,
            Algorithm::MonoCompressor => MONO_COMPRESSOR,
            Algorithm::Pons => PONS,
            Algorithm::SmallStereoAdjust => SMALL_STEREO_ADJUST,
        }
    }

    /// Named parameters in parameter-number order
    pub fn param_names(self) -> impl Iterator<Item = (usize, &'static str)> {
        self.param_map()
            .iter()
            .enumerate()
            .filter_map(|(number, name)| name.map(|n| (number, n)))
    }

    pub fn param_number(self, name: &str) -> Option<usize> {
        self.param_names().find(|(_, n)| *n == name).map(|(number, _)| number)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Display name for an algorithm byte, synthetic for unknown IDs
pub fn algorithm_name_for_id(id: u8) -> String {
    match Algorithm::from_id(id) {
        Some(algorithm) => algorithm.name().to_string(),
        None => format!("UnknownAlgoID_{}", id),
    }
}

/// Documented range for a parameter name, if any
pub fn param_range(name: &str) -> Option<(u16, u16)> {
    PARAM_RANGES
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|&(_, lo, hi)| (lo, hi))
}

/// Clamp a decoded value into its documented range, or 14 bits
pub fn clamp_param(name: &str, value: u16) -> u16 {
    let (lo, hi) = param_range(name).unwrap_or((0, MAX_PARAM_VALUE));
    value.clamp(lo, hi)
}

/// True when some algorithm maps this parameter name
pub fn is_known_param(name: &str) -> bool {
    Algorithm::ALL
        .into_iter()
        .any(|a| a.param_number(name).is_some())
}

use phf::phf_map;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 输出画质
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Quality {
    #[serde(rename = "1k")]
    OneK,
    #[serde(rename = "2k")]
    #[default]
    TwoK,
    #[serde(rename = "4k")]
    FourK,
}

static QUALITY_TABLE: phf::Map<&'static str, Quality> = phf_map! {
    "1k" => Quality::OneK,
    "2k" => Quality::TwoK,
    "4k" => Quality::FourK,
};

impl Quality {
    /// 解析画质参数，无法识别或缺省时回退到 2k
    pub fn parse(value: Option<&str>) -> Self {
        value
            .map(|v| v.trim().to_ascii_lowercase())
            .and_then(|v| QUALITY_TABLE.get(v.as_str()).copied())
            .unwrap_or_default()
    }

    /// 目标输出尺寸
    pub fn dimensions(self) -> Dimensions {
        let side = match self {
            Quality::OneK => 1024,
            Quality::TwoK => 2048,
            Quality::FourK => 4096,
        };
        Dimensions::new(side, side)
    }

    /// 传给合成服务的画质提示
    pub fn hint(self) -> &'static str {
        match self {
            Quality::OneK => "1K",
            Quality::TwoK => "2K",
            Quality::FourK => "4K",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::OneK => "1k",
            Quality::TwoK => "2k",
            Quality::FourK => "4k",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 图片尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

use std::fmt;

/// Header of the identifier column that leads every CSV row.
pub const FILE_NAME_HEADER: &str = "fileName";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Family,
    CpuType,
    FirstSeen,
    Size,
    Md5,
}

impl Column {
    pub const ALL: [Column; 5] = [
        Column::Family,
        Column::CpuType,
        Column::FirstSeen,
        Column::Size,
        Column::Md5,
    ];

    /// CSV header name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Column::Family => "family",
            Column::CpuType => "cpuType",
            Column::FirstSeen => "firstSeen",
            Column::Size => "size",
            Column::Md5 => "md5",
        }
    }

    /// Clap argument id of the flag that selects this column.
    pub const fn flag_id(self) -> &'static str {
        match self {
            Column::Family => "family",
            Column::CpuType => "cpu_type",
            Column::FirstSeen => "first_seen",
            Column::Size => "size",
            Column::Md5 => "md5",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Type {
    Int64,
}

impl Type {
    /// On-disk width in bytes.
    pub fn get_len(&self) -> usize {
        match self {
            Type::Int64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub t: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    /// Bytes occupied by one tuple of this schema.
    pub fn get_size(&self) -> usize {
        self.fields.iter().map(|f| f.t.get_len()).sum()
    }

    pub fn get_width(&self) -> usize {
        self.fields.len()
    }

    /// A schema of `width` Int64 columns, the only shape the tables here
    /// use.
    pub fn small_int_schema(width: usize) -> Self {
        let fields = (0..width)
            .map(|i| Field {
                name: format!("c{}", i),
                t: Type::Int64,
            })
            .collect();
        Self { fields }
    }
}

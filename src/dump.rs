//! Textual report of the arena's pages.

use std::fmt;

use crate::{
    arena::Arena,
    header::{PageHeader, PageKind, PageState},
};

/// One occupied page as seen by [`Report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    pub index: usize,
    /// Address of the page, header included.
    pub addr: usize,
    pub header: PageHeader,
}

impl PageEntry {
    #[inline]
    pub fn state(&self) -> PageState {
        self.header.state()
    }
}

/// Snapshot of every occupied page plus the number of free ones.
///
/// Rendering it with `{}` gives a table like this one:
///
/// ```text
/// ================================ DUMP =================================
///  page |            addr | state    | kind      |    num |   size
/// -----------------------------------------------------------------------
///     0 |  0x7f3a5c000000 | occupied | blocks    |      2 |      4
///     1 |  0x7f3a5c000fa0 | occupied | multipage |      0 |      2
///     2 |  0x7f3a5c001f40 | occupied | multipage |      1 |      2
/// -----------------------------------------------------------------------
/// free pages: 997 of 1000
/// =======================================================================
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub entries: Vec<PageEntry>,
    pub free_pages: usize,
    pub page_count: usize,
}

impl Report {
    pub(crate) fn collect(arena: &Arena) -> Self {
        let entries = arena
            .headers()
            .filter(|(_, header)| !header.is_free())
            .map(|(index, header)| PageEntry {
                index,
                addr: arena.page_addr(index).as_ptr() as usize,
                header,
            })
            .collect::<Vec<_>>();

        Self {
            free_pages: arena.page_count() - entries.len(),
            page_count: arena.page_count(),
            entries,
        }
    }
}

const RULE: &str = "-----------------------------------------------------------------------";

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=^71}", " DUMP ")?;
        writeln!(
            f,
            "{:>5} | {:>15} | {:<8} | {:<9} | {:>6} | {:>6}",
            "page", "addr", "state", "kind", "num", "size"
        )?;
        writeln!(f, "{RULE}")?;

        for entry in &self.entries {
            let kind = match entry.header.kind() {
                PageKind::BlockPool => "blocks",
                PageKind::MultiPage => "multipage",
            };

            writeln!(
                f,
                "{:>5} | {:>#15x} | {:<8} | {:<9} | {:>6} | {:>6}",
                entry.index,
                entry.addr,
                "occupied",
                kind,
                entry.header.num(),
                entry.header.size()
            )?;
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "free pages: {} of {}", self.free_pages, self.page_count)?;
        writeln!(f, "{:=^71}", "")
    }
}

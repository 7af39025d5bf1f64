mod helpers;
mod merge;

pub mod dead_letter_item;
